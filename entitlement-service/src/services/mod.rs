pub mod admin;
pub mod database;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod metering;
pub mod metrics;
pub mod payments;
pub mod promo;
pub mod reconciler;
pub mod refunds;
pub mod session;
pub mod store;

pub use admin::AdminOverride;
pub use database::Database;
pub use gateway::{PaymentGateway, RazorpayGateway};
pub use ledger::SubscriptionLedger;
pub use memory::MemoryStore;
pub use metering::ViewMetering;
pub use metrics::{get_metrics, init_metrics};
pub use payments::{PaymentAdapter, PaymentWriter, PurchaseRequest};
pub use promo::PromoService;
pub use reconciler::EntitlementReconciler;
pub use refunds::RefundWorkflow;
pub use session::{Role, SessionClaims, SessionService};
pub use store::{EntitlementStore, SharedStore};
