//! Prototype MCP server exposing `analyze_stock_posts`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use skypulse_mcp_types::JSONRPCMessage;
use tokio::io;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod message_processor;
mod outgoing_message;
mod render;
mod tool_config;
mod tool_runner;

use crate::message_processor::MessageProcessor;
use crate::outgoing_message::OutgoingMessage;
use crate::outgoing_message::OutgoingMessageSender;

pub use crate::cli::Cli;
pub use crate::render::NO_POSTS_MESSAGE;
pub use crate::tool_config::ANALYZE_STOCK_POSTS_TOOL_NAME;
pub use crate::tool_config::AnalyzeRequest;
pub use crate::tool_config::AnalyzeStockPostsParams;
pub use crate::tool_config::CollectionSource;
pub use crate::tool_runner::Collection;
pub use crate::tool_runner::DEFAULT_SCORING_CONCURRENCY;
pub use crate::tool_runner::ToolContext;

/// Size of the bounded channels used to communicate between tasks. The value
/// is a balance between throughput and memory usage; 128 messages should be
/// plenty for an interactive CLI.
const CHANNEL_CAPACITY: usize = 128;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    // Stdout carries the JSON-RPC stream, so logs go to stderr. Users can
    // control the log level with `RUST_LOG`.
    let stderr_fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        );
    let _ = tracing_subscriber::registry().with(stderr_fmt).try_init();

    let tools = cli.into_tool_context()?;

    tokio::select! {
        () = serve(io::stdin(), io::stdout(), Arc::new(tools)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received ctrl-c, shutting down");
        }
    }
    Ok(())
}

/// Runs the newline-delimited JSON-RPC loop until `reader` hits EOF.
pub async fn serve<R, W>(reader: R, writer: W, tools: Arc<ToolContext>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Set up channels.
    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OutgoingMessage>(CHANNEL_CAPACITY);

    // Task: read from `reader`, push to `incoming_tx`.
    let reader_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.unwrap_or_default() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JSONRPCMessage>(&line) {
                Ok(msg) => {
                    if incoming_tx.send(msg).await.is_err() {
                        // Receiver gone; nothing left to do.
                        break;
                    }
                }
                Err(e) => error!("Failed to deserialize JSONRPCMessage: {e}"),
            }
        }

        debug!("reader finished (EOF)");
    });

    // Task: process incoming messages.
    let processor_handle = tokio::spawn({
        let mut processor = MessageProcessor::new(OutgoingMessageSender::new(outgoing_tx), tools);
        async move {
            while let Some(msg) = incoming_rx.recv().await {
                match msg {
                    JSONRPCMessage::Request(r) => processor.process_request(r).await,
                    JSONRPCMessage::Response(r) => processor.process_response(r),
                    JSONRPCMessage::Notification(n) => processor.process_notification(n).await,
                    JSONRPCMessage::Error(e) => processor.process_error(e),
                }
            }

            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing messages to `writer`.
    let writer_handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(outgoing_message) = outgoing_rx.recv().await {
            let msg: JSONRPCMessage = outgoing_message.into();
            match serde_json::to_string(&msg) {
                Ok(mut json) => {
                    json.push('\n');
                    if let Err(e) = writer.write_all(json.as_bytes()).await {
                        error!("Failed to write message: {e}");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        error!("Failed to flush message: {e}");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize JSONRPCMessage: {e}"),
            }
        }

        info!("writer exited (channel closed)");
    });

    // Wait for all tasks to finish. The typical exit path is the reader
    // hitting EOF which, once it drops `incoming_tx`, propagates shutdown to
    // the processor and then to the writer task once in-flight tool calls
    // have responded.
    let _ = tokio::join!(reader_handle, processor_handle, writer_handle);
}
