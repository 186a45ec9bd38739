use std::net::SocketAddr;
use std::time::Instant;
use tracing::debug;

use crate::filter::{AnswerFilter, ResponseWriter, ServeOutcome};
use crate::logging::QueryLogger;
use crate::packet::{self, DnsMessage};
use crate::upstream::Upstream;

/// Run one client packet through parse, upstream, filter and write.
///
/// Returns `None` when the packet was not a query we could answer. A packet
/// with at least a full header still gets a FORMERR reply.
pub async fn handle_query<U, W>(
    query_bytes: &[u8],
    src: SocketAddr,
    upstream: &U,
    filter: &AnswerFilter,
    logger: Option<&QueryLogger>,
    writer: &mut W,
) -> Option<ServeOutcome>
where
    U: Upstream,
    W: ResponseWriter,
{
    let query = match packet::parse_query(query_bytes) {
        Ok(q) => q,
        Err(e) => {
            debug!("Failed to parse DNS query from {}: {}", src, e);
            if query_bytes.len() >= 12 {
                let id = u16::from_be_bytes([query_bytes[0], query_bytes[1]]);
                let flags = u16::from_be_bytes([query_bytes[2], query_bytes[3]]);
                if let Err(e) = writer.write_msg(&DnsMessage::format_error(id, flags)).await {
                    debug!("Failed to write FORMERR to {}: {}", src, e);
                }
            }
            return None;
        }
    };
    writer.set_payload_limit(query.udp_payload_size);

    let start = Instant::now();
    let result = upstream.resolve(query_bytes).await;
    if let Some(ref e) = result.error {
        debug!("Upstream error for {:04x} from {}: {:#}", query.header.id, src, e);
    }

    let outcome = filter.serve(&query, result, writer).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if let Some(q) = query.questions.first() {
        if outcome.removed > 0 {
            debug!(
                "Removed {} local A record(s) from {} {} for {}",
                outcome.removed, q.name, q.qtype, src
            );
        }
        if let Some(logger) = logger {
            logger.log(
                &q.name,
                &q.qtype.to_string(),
                &src.ip().to_string(),
                outcome.rcode,
                outcome.removed,
                elapsed_ms,
            );
        }
    }

    Some(outcome)
}
