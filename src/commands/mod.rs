//! Chat command layer: parse, apply, reply.

pub mod handler;
pub mod parser;

use std::sync::Arc;

use futures::StreamExt;
use tracing::{info, warn};

use crate::channels::CommandSource;
use crate::error::ChannelError;

pub use handler::CommandHandler;
pub use parser::{Command, parse_bool};

/// Receive commands until the stream ends. Each command runs in its own task
/// so a slow reply never holds up the next command.
pub async fn serve(
    source: Arc<dyn CommandSource>,
    handler: Arc<CommandHandler>,
) -> Result<(), ChannelError> {
    let mut stream = source.start().await?;

    while let Some(cmd) = stream.next().await {
        let source = Arc::clone(&source);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let reply = handler.handle(&cmd).await;
            if let Err(e) = source.reply(&cmd, &reply).await {
                warn!(tenant = %cmd.tenant, command = %cmd.name, "Failed to send reply: {e}");
            }
        });
    }

    info!("Command stream ended");
    Ok(())
}
