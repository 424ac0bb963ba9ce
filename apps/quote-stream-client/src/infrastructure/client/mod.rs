//! Quote Service Client
//!
//! Request/response correlation, stream demultiplexing and connection
//! lifecycle on top of a [`Transport`](crate::application::ports::Transport).
//!
//! # Example
//!
//! ```ignore
//! let client = QuoteClient::connect(&config).await?;
//! let info = client.get_info().await?;
//!
//! let QuoteStreamResponse { mut stream, .. } = client
//!     .new_swap_quote_stream(SwapQuoteRequest::new(swap, transaction))
//!     .await?;
//! while let Some(quote) = stream.next().await {
//!     println!("{:?}", quote?);
//! }
//! client.close().await;
//! ```

mod connection;
mod correlation;
mod demux;
mod error;

pub use connection::{ConnectionState, QuoteClient, QuoteStreamResponse};
pub use demux::{QuoteStream, StreamStopper};
pub use error::{ClientError, ConnectionFault, ProtocolViolation, StreamError};
