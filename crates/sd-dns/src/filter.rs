//! Drops A records that point into the local host's own group.

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use sd_identity::LocalIdentity;
use sd_iptable::{GroupId, IntervalTable};

use crate::packet::{DnsMessage, DnsQuery, RCODE_NOERROR, RCODE_SERVFAIL};
use crate::records::DnsRecord;
use crate::upstream::UpstreamResult;

/// Final destination of a response. Called exactly once per query.
pub trait ResponseWriter {
    fn write_msg(&mut self, message: &DnsMessage) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Largest response the client accepts. Only datagram transports care.
    fn set_payload_limit(&mut self, _limit: usize) {}
}

/// Result of serving one query.
#[derive(Debug)]
pub struct ServeOutcome {
    /// Response code reported by upstream
    pub rcode: u8,
    /// Error reported by upstream
    pub error: Option<anyhow::Error>,
    /// A records dropped from the answer section
    pub removed: usize,
}

/// Filtered copy of `answers` without the A records classified into
/// `local_group`. Every other record is kept, in order.
///
/// Returns `None` when nothing matched: the caller keeps the original
/// answers instead of a rebuilt list.
pub fn rewrite_answers(
    table: &IntervalTable,
    answers: &[DnsRecord],
    local_group: GroupId,
) -> Option<Vec<DnsRecord>> {
    let mut kept = Vec::with_capacity(answers.len());
    let mut removed = 0usize;

    for record in answers {
        if let Some(ip) = record.ipv4() {
            if table.classify(ip) == local_group {
                removed += 1;
                continue;
            }
        }
        // CNAMEs and other records must stay, or the client cannot follow
        // the chain to the addresses that remain.
        kept.push(record.clone());
    }

    if removed == 0 { None } else { Some(kept) }
}

#[derive(Clone)]
pub struct AnswerFilter {
    table: Arc<IntervalTable>,
    identity: Arc<LocalIdentity>,
}

impl AnswerFilter {
    pub fn new(table: Arc<IntervalTable>, identity: Arc<LocalIdentity>) -> Self {
        Self { table, identity }
    }

    pub fn table(&self) -> &IntervalTable {
        &self.table
    }

    /// Rewrite the answer section in place. Returns the number of records
    /// removed. The local group is read once per call.
    pub fn filter_message(&self, message: &mut DnsMessage) -> usize {
        let local_group = self.identity.local_group();
        match rewrite_answers(&self.table, &message.answers, local_group) {
            Some(kept) => {
                let removed = message.answers.len() - kept.len();
                message.set_answers(kept);
                removed
            }
            None => 0,
        }
    }

    /// Filter a successful upstream answer and write the response.
    ///
    /// Failed lookups and answers with nothing removed go out as the bytes
    /// upstream sent. When upstream produced no
    /// message at all, an error response for `query` is written instead. The
    /// upstream rcode and error are returned as-is.
    pub async fn serve<W: ResponseWriter>(
        &self,
        query: &DnsQuery,
        upstream: UpstreamResult,
        writer: &mut W,
    ) -> ServeOutcome {
        let success = upstream.is_success();
        let UpstreamResult { rcode, error, message } = upstream;

        let mut removed = 0;
        let response = match message {
            Some(mut message) if success => {
                removed = self.filter_message(&mut message);
                message
            }
            Some(message) => message,
            None => {
                let rcode = if rcode == RCODE_NOERROR { RCODE_SERVFAIL } else { rcode };
                DnsMessage::error_for(query, rcode)
            }
        };

        if let Err(e) = writer.write_msg(&response).await {
            debug!("Failed to write response {:04x}: {}", response.header.id, e);
        }

        ServeOutcome { rcode, error, removed }
    }
}
