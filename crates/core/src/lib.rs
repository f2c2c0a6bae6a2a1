pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod pricing;
pub mod session;

pub use domain::quote::{QuoteFields, QuoteId, QuoteRecord, QuoteStatus, SaveAction, SaveOutcome};
pub use domain::service::{Service, ServiceCategory, ServiceId, ServiceInput};
pub use domain::settings::{DiscountType, Settings, SettingsPatch};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, SessionAction, SessionEvent, SessionStep};
pub use pricing::{compute_price, DiscountPolicy, PriceQuote, PriceRequest};
pub use session::{FormPatch, QuoteSession, SessionId};
