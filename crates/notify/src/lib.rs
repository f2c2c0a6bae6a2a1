//! Outbound email for the quote funnel.
//!
//! - **Transports** (`transport`) - HTTP email API, log-only, and a recording fake
//! - **Templates** (`templates`) - tera-rendered business, customer, follow-up,
//!   abandonment and outside-area messages
//! - **Delivery** (`delivery`) - retry with backoff and structured failure logging
//!
//! ```text
//! QuoteSessionService / FollowupSweep → Mailer → EmailTransport → email API
//!                                          ↑
//!                                   EmailTemplates
//! ```

pub mod delivery;
pub mod templates;
pub mod transport;

pub use delivery::{DeliveryError, DeliveryPolicy, Mailer, SubmissionReport};
pub use templates::{EmailTemplates, QuoteEmailContext, RenderedEmail, TemplateError};
pub use transport::{
    transport_from_config, EmailMessage, EmailTransport, HttpEmailTransport, LogEmailTransport,
    RecordingTransport, SendReceipt, TransportError,
};
