pub mod db;
pub mod identity;
pub mod mail_bridge;

pub use db::PgLedgerStore;
pub use identity::RequestIdentity;
pub use mail_bridge::MailBridgeSource;
