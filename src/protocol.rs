//! Wire framing shared by the ingestion endpoint and the transmitting client.
//!
//! One connection carries one batch. The client writes one JSON encoded
//! [`Reading`](crate::models::Reading) per line with no count prefix, then
//! half-closes its write side. The server answers with a single
//! [`Ack`](crate::models::Ack) line and closes.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

/// Upper bound for one encoded message; a reading is well under 1 KiB.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

pub type LineStream<S> = Framed<S, LinesCodec>;

pub fn framed<S>(io: S) -> LineStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}
