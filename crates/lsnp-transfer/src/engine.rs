//! Transfer engine -- sender and receiver sessions keyed by file id.

use std::collections::{HashMap, VecDeque};

use lsnp_protocol::{
    fresh_message_id, Ack, AckStatus, Destination, FileChunk, FileOffer, FileReceived,
    Message, UserId, FILE_STATUS_COMPLETE, LSNP_TIMING,
};
use lsnp_reliability::{ExchangeKind, Outbound};

use crate::chunk::{chunk_at, chunk_count, Reassembly};
use crate::TransferError;

/// Completed incoming transfers remembered so late chunk retransmissions
/// can still be acknowledged.
const COMPLETED_MEMORY: usize = 64;

/// Work for the node after a transfer state change.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferAction {
    Send(Outbound),
    Persist(ReceivedFile),
    Notify(TransferEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: String,
    pub from: UserId,
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    OfferReceived {
        from: UserId,
        file_id: String,
        filename: String,
        filesize: u64,
        description: String,
    },
    OfferAccepted { to: UserId, file_id: String },
    OfferRejected { to: UserId, file_id: String },
    OfferExpired { to: UserId, file_id: String },
    SendFinished {
        to: UserId,
        file_id: String,
        filename: String,
        chunks: u32,
        failed_chunks: u32,
    },
    FileReceived {
        from: UserId,
        file_id: String,
        filename: String,
        size: usize,
    },
    PeerConfirmed { from: UserId, file_id: String },
    /// We never answered their offer.
    OfferLapsed { from: UserId, file_id: String },
    /// An accepted transfer stopped receiving chunks.
    TransferStalled {
        from: UserId,
        file_id: String,
        filename: String,
    },
}

#[derive(Debug)]
enum OutgoingState {
    Offered,
    Sending { in_flight: u32 },
}

#[derive(Debug)]
struct OutgoingTransfer {
    to: UserId,
    filename: String,
    data: Vec<u8>,
    total_chunks: u32,
    failed_chunks: u32,
    state: OutgoingState,
}

#[derive(Debug)]
struct IncomingTransfer {
    from: UserId,
    filename: String,
    offer_message_id: String,
    reassembly: Option<Reassembly>,
    last_activity: u64,
}

#[derive(Debug)]
struct PendingOffer {
    offer: FileOffer,
    received_at: u64,
}

pub struct TransferEngine {
    local: UserId,
    chunk_size: usize,
    outgoing: HashMap<String, OutgoingTransfer>,
    offers: HashMap<String, PendingOffer>,
    incoming: HashMap<String, IncomingTransfer>,
    completed: VecDeque<(String, UserId)>,
}

impl TransferEngine {
    pub fn new(local: UserId) -> Self {
        Self::with_chunk_size(local, LSNP_TIMING.file_chunk_bytes)
    }

    pub fn with_chunk_size(local: UserId, chunk_size: usize) -> Self {
        Self {
            local,
            chunk_size: chunk_size.max(1),
            outgoing: HashMap::new(),
            offers: HashMap::new(),
            incoming: HashMap::new(),
            completed: VecDeque::new(),
        }
    }

    // -- Sender side --

    /// Offer `data` to `to`. Returns the new file id and the FILE_OFFER to send.
    pub fn offer(
        &mut self,
        to: UserId,
        filename: &str,
        filetype: &str,
        description: &str,
        data: Vec<u8>,
    ) -> Result<(String, Vec<TransferAction>), TransferError> {
        if filename.trim().is_empty() {
            return Err(TransferError::EmptyFilename);
        }
        if data.len() / self.chunk_size >= u32::MAX as usize {
            return Err(TransferError::TooLarge { size: data.len() });
        }

        let file_id = fresh_message_id();
        let total_chunks = chunk_count(data.len(), self.chunk_size);
        let offer = FileOffer {
            from: self.local.clone(),
            to: to.clone(),
            filename: filename.to_string(),
            filesize: data.len() as u64,
            filetype: filetype.to_string(),
            file_id: file_id.clone(),
            description: description.to_string(),
            message_id: fresh_message_id(),
            token: String::new(),
        };
        tracing::info!(
            file_id = %file_id,
            to = %to,
            size = data.len(),
            chunks = total_chunks,
            "offering file"
        );

        self.outgoing.insert(
            file_id.clone(),
            OutgoingTransfer {
                to: to.clone(),
                filename: filename.to_string(),
                data,
                total_chunks,
                failed_chunks: 0,
                state: OutgoingState::Offered,
            },
        );

        let send = Outbound::reliable(
            Message::FileOffer(offer),
            Destination::Peer(to),
            LSNP_TIMING.file_offer_retry,
            ExchangeKind::FileOffer {
                file_id: file_id.clone(),
            },
        );
        Ok((file_id, vec![TransferAction::Send(send)]))
    }

    /// The receiver answered our offer.
    pub fn on_offer_answered(&mut self, file_id: &str, status: AckStatus) -> Vec<TransferAction> {
        let Some(transfer) = self.outgoing.get_mut(file_id) else {
            tracing::debug!(file_id, "answer for unknown outgoing transfer");
            return Vec::new();
        };
        if !matches!(transfer.state, OutgoingState::Offered) {
            return Vec::new();
        }

        match status {
            AckStatus::Accepted => {
                transfer.state = OutgoingState::Sending { in_flight: 0 };
                let to = transfer.to.clone();
                let mut actions = vec![TransferAction::Notify(TransferEvent::OfferAccepted {
                    to,
                    file_id: file_id.to_string(),
                })];
                actions.extend(self.chunk_action(file_id, 0));
                actions
            }
            AckStatus::Rejected => {
                let Some(transfer) = self.outgoing.remove(file_id) else {
                    return Vec::new();
                };
                tracing::info!(file_id, to = %transfer.to, "offer rejected");
                vec![TransferAction::Notify(TransferEvent::OfferRejected {
                    to: transfer.to,
                    file_id: file_id.to_string(),
                })]
            }
            AckStatus::Received => Vec::new(),
        }
    }

    /// The offer's retry budget ran out.
    pub fn on_offer_abandoned(&mut self, file_id: &str) -> Vec<TransferAction> {
        match self.outgoing.remove(file_id) {
            Some(transfer) => vec![TransferAction::Notify(TransferEvent::OfferExpired {
                to: transfer.to,
                file_id: file_id.to_string(),
            })],
            None => Vec::new(),
        }
    }

    /// Chunk `chunk_index` was ACKed (`delivered`) or abandoned. Sends the
    /// next chunk, or closes the session after the last one.
    pub fn on_chunk_settled(
        &mut self,
        file_id: &str,
        chunk_index: u32,
        delivered: bool,
    ) -> Vec<TransferAction> {
        let Some(transfer) = self.outgoing.get_mut(file_id) else {
            return Vec::new();
        };
        let OutgoingState::Sending { in_flight } = transfer.state else {
            return Vec::new();
        };
        if in_flight != chunk_index {
            tracing::debug!(file_id, chunk_index, in_flight, "stale chunk settlement");
            return Vec::new();
        }
        if !delivered {
            transfer.failed_chunks += 1;
            tracing::warn!(file_id, chunk_index, "chunk abandoned");
        }

        let next = chunk_index + 1;
        if next < transfer.total_chunks {
            transfer.state = OutgoingState::Sending { in_flight: next };
            return self.chunk_action(file_id, next).into_iter().collect();
        }

        let Some(transfer) = self.outgoing.remove(file_id) else {
            return Vec::new();
        };
        tracing::info!(
            file_id,
            to = %transfer.to,
            chunks = transfer.total_chunks,
            failed = transfer.failed_chunks,
            "all chunks sent"
        );
        vec![TransferAction::Notify(TransferEvent::SendFinished {
            to: transfer.to,
            file_id: file_id.to_string(),
            filename: transfer.filename,
            chunks: transfer.total_chunks,
            failed_chunks: transfer.failed_chunks,
        })]
    }

    fn chunk_action(&self, file_id: &str, index: u32) -> Option<TransferAction> {
        let transfer = self.outgoing.get(file_id)?;
        let bytes = chunk_at(&transfer.data, index, self.chunk_size).to_vec();
        let chunk = FileChunk {
            from: self.local.clone(),
            to: transfer.to.clone(),
            file_id: file_id.to_string(),
            chunk_index: index,
            total_chunks: transfer.total_chunks,
            chunk_size: bytes.len() as u32,
            data: bytes,
            message_id: fresh_message_id(),
            token: String::new(),
        };
        Some(TransferAction::Send(Outbound::reliable(
            Message::FileChunk(chunk),
            Destination::Peer(transfer.to.clone()),
            LSNP_TIMING.file_chunk_retry,
            ExchangeKind::FileChunk {
                file_id: file_id.to_string(),
                chunk_index: index,
            },
        )))
    }

    // -- Receiver side --

    /// An offer arrived. Retransmissions are not surfaced twice.
    pub fn on_offer(&mut self, offer: FileOffer, now: u64) -> Vec<TransferAction> {
        if let Some(session) = self.incoming.get(&offer.file_id) {
            // Our ACCEPTED was lost; say it again.
            return vec![ack(
                &session.offer_message_id,
                AckStatus::Accepted,
                &session.from,
            )];
        }
        if self.offers.contains_key(&offer.file_id) {
            return Vec::new();
        }

        tracing::info!(
            file_id = %offer.file_id,
            from = %offer.from,
            filename = %offer.filename,
            size = offer.filesize,
            "file offered"
        );
        let event = TransferEvent::OfferReceived {
            from: offer.from.clone(),
            file_id: offer.file_id.clone(),
            filename: offer.filename.clone(),
            filesize: offer.filesize,
            description: offer.description.clone(),
        };
        self.offers.insert(
            offer.file_id.clone(),
            PendingOffer {
                offer,
                received_at: now,
            },
        );
        vec![TransferAction::Notify(event)]
    }

    pub fn accept(
        &mut self,
        file_id: &str,
        now: u64,
    ) -> Result<Vec<TransferAction>, TransferError> {
        let offer = self
            .offers
            .remove(file_id)
            .ok_or_else(|| TransferError::UnknownOffer(file_id.to_string()))?
            .offer;
        let reply = ack(&offer.message_id, AckStatus::Accepted, &offer.from);
        self.incoming.insert(
            offer.file_id.clone(),
            IncomingTransfer {
                from: offer.from,
                filename: offer.filename,
                offer_message_id: offer.message_id,
                reassembly: None,
                last_activity: now,
            },
        );
        Ok(vec![reply])
    }

    pub fn reject(&mut self, file_id: &str) -> Result<Vec<TransferAction>, TransferError> {
        let offer = self
            .offers
            .remove(file_id)
            .ok_or_else(|| TransferError::UnknownOffer(file_id.to_string()))?
            .offer;
        Ok(vec![ack(&offer.message_id, AckStatus::Rejected, &offer.from)])
    }

    pub fn on_chunk(&mut self, chunk: FileChunk, now: u64) -> Vec<TransferAction> {
        let Some(session) = self.incoming.get_mut(&chunk.file_id) else {
            if self
                .completed
                .iter()
                .any(|(id, from)| *id == chunk.file_id && *from == chunk.from)
            {
                return vec![ack(&chunk.message_id, AckStatus::Received, &chunk.from)];
            }
            tracing::debug!(file_id = %chunk.file_id, "chunk for no live session");
            return Vec::new();
        };
        if session.from != chunk.from {
            tracing::warn!(
                file_id = %chunk.file_id,
                expected = %session.from,
                got = %chunk.from,
                "chunk from wrong sender"
            );
            return Vec::new();
        }
        session.last_activity = now;

        let reassembly = session
            .reassembly
            .get_or_insert_with(|| Reassembly::new(chunk.total_chunks));
        if reassembly.total() != chunk.total_chunks {
            tracing::warn!(
                file_id = %chunk.file_id,
                expected = reassembly.total(),
                got = chunk.total_chunks,
                "TOTAL_CHUNKS changed mid-transfer"
            );
            return Vec::new();
        }
        if let Err(e) = reassembly.insert(chunk.chunk_index, chunk.data) {
            tracing::warn!(file_id = %chunk.file_id, "dropping chunk: {e}");
            return Vec::new();
        }
        tracing::debug!(
            file_id = %chunk.file_id,
            index = chunk.chunk_index,
            received = reassembly.received(),
            total = reassembly.total(),
            "chunk stored"
        );

        let mut actions = vec![ack(&chunk.message_id, AckStatus::Received, &chunk.from)];
        if !reassembly.is_complete() {
            return actions;
        }

        let Some(session) = self.incoming.remove(&chunk.file_id) else {
            return actions;
        };
        let data = session
            .reassembly
            .map(Reassembly::assemble)
            .unwrap_or_default();
        tracing::info!(
            file_id = %chunk.file_id,
            from = %session.from,
            size = data.len(),
            "transfer complete"
        );

        self.completed.push_back((chunk.file_id.clone(), session.from.clone()));
        if self.completed.len() > COMPLETED_MEMORY {
            self.completed.pop_front();
        }

        let size = data.len();
        actions.push(TransferAction::Persist(ReceivedFile {
            file_id: chunk.file_id.clone(),
            from: session.from.clone(),
            filename: session.filename.clone(),
            data,
        }));
        actions.push(TransferAction::Send(Outbound::unreliable(
            Message::FileReceived(FileReceived {
                from: self.local.clone(),
                to: session.from.clone(),
                file_id: chunk.file_id.clone(),
                status: FILE_STATUS_COMPLETE.to_string(),
            }),
            Destination::Peer(session.from.clone()),
        )));
        actions.push(TransferAction::Notify(TransferEvent::FileReceived {
            from: session.from,
            file_id: chunk.file_id,
            filename: session.filename,
            size,
        }));
        actions
    }

    pub fn on_received(&mut self, msg: FileReceived) -> Vec<TransferAction> {
        tracing::info!(file_id = %msg.file_id, from = %msg.from, status = %msg.status, "peer confirmed file");
        vec![TransferAction::Notify(TransferEvent::PeerConfirmed {
            from: msg.from,
            file_id: msg.file_id,
        })]
    }

    /// Drop offers we left unanswered and accepted transfers whose sender
    /// went quiet, once past the stale limit.
    pub fn expire(&mut self, now: u64) -> Vec<TransferAction> {
        let limit = LSNP_TIMING.stale_session_secs;
        let is_stale = |since: u64| now.saturating_sub(since) >= limit;

        let mut lapsed: Vec<String> = self
            .offers
            .iter()
            .filter(|(_, p)| is_stale(p.received_at))
            .map(|(id, _)| id.clone())
            .collect();
        lapsed.sort();
        let mut stalled: Vec<String> = self
            .incoming
            .iter()
            .filter(|(_, t)| is_stale(t.last_activity))
            .map(|(id, _)| id.clone())
            .collect();
        stalled.sort();

        let mut actions = Vec::new();
        for file_id in lapsed {
            if let Some(pending) = self.offers.remove(&file_id) {
                tracing::info!(file_id = %file_id, from = %pending.offer.from, "unanswered offer lapsed");
                actions.push(TransferAction::Notify(TransferEvent::OfferLapsed {
                    from: pending.offer.from,
                    file_id,
                }));
            }
        }
        for file_id in stalled {
            if let Some(transfer) = self.incoming.remove(&file_id) {
                tracing::warn!(file_id = %file_id, from = %transfer.from, "incoming transfer stalled");
                actions.push(TransferAction::Notify(TransferEvent::TransferStalled {
                    from: transfer.from,
                    file_id,
                    filename: transfer.filename,
                }));
            }
        }
        actions
    }

    // -- Inspection --

    pub fn pending_offers(&self) -> Vec<&FileOffer> {
        let mut offers: Vec<&FileOffer> = self.offers.values().map(|p| &p.offer).collect();
        offers.sort_by(|a, b| a.filename.cmp(&b.filename));
        offers
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    /// Drop every session (shutdown).
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.offers.clear();
        self.incoming.clear();
    }
}

fn ack(message_id: &str, status: AckStatus, to: &UserId) -> TransferAction {
    TransferAction::Send(Outbound::unreliable(
        Message::Ack(Ack {
            message_id: message_id.to_string(),
            status,
        }),
        Destination::Peer(to.clone()),
    ))
}
