pub mod connection;
pub mod identity;
pub mod ledger;
pub mod otp;
pub mod pager;
pub mod session;

pub use connection::{ConnectionRegistry, ConnectionStatus};
pub use identity::IdentityStore;
pub use ledger::{CreditCheck, CreditLedger, DeliveredEmail, DenialReason, SendOutcome};
pub use otp::{OtpChallenge, OtpManager};
pub use pager::ConversationPager;
pub use session::SessionIssuer;
