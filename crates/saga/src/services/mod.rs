//! External collaborators used by the sagas.

pub mod assets;
pub mod gateway;
pub mod http_gateway;
pub mod notifier;

pub use assets::{AssetRules, AssetStore, AssetUpload, InMemoryAssetStore, delete_all, upload_all};
pub use gateway::{
    InMemoryPaymentGateway, PayeeProfile, PaymentGateway, TransferReceipt, TransferRequest,
    destination_is_valid,
};
pub use http_gateway::{HttpGatewayConfig, HttpPaymentGateway};
pub use notifier::{InMemoryNotifier, Notification, Notifier, TracingNotifier};
