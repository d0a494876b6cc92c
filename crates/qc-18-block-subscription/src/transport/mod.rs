//! Connection and Transport Server.

pub mod connection;
pub mod server;

pub use connection::Connection;
pub use server::{ConnectionHandler, SessionSettings, TcpServer};

use tokio::sync::watch;

/// Resolve once `flag` reads true, or once its sender is gone.
pub(crate) async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    loop {
        let set = *flag.borrow_and_update();
        if set {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}
