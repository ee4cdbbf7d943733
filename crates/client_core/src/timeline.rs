use std::collections::HashSet;

use shared::{
    domain::{ClientMessageId, Message, MessageTime, RecordId, ReplyPreview},
    protocol::{OutgoingMessage, RealtimeEvent},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{error::ClientError, ClientHandle};

/// Page size used when a send is followed by a history reload.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub client_id: ClientMessageId,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEntry<'a> {
    Confirmed(&'a Message),
    Pending(&'a Message),
}

impl<'a> TimelineEntry<'a> {
    pub fn message(&self) -> &'a Message {
        match self {
            TimelineEntry::Confirmed(message) | TimelineEntry::Pending(message) => message,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TimelineEntry::Pending(_))
    }
}

/// Messages of the channel being viewed, plus optimistic sends not yet
/// acknowledged by the server. Pending entries always render after
/// confirmed ones.
#[derive(Debug, Clone)]
pub struct ChannelTimeline {
    channel: String,
    messages: Vec<Message>,
    seen: HashSet<String>,
    pending: Vec<PendingSend>,
}

impl ChannelTimeline {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    pub fn entries(&self) -> Vec<TimelineEntry<'_>> {
        self.messages
            .iter()
            .map(TimelineEntry::Confirmed)
            .chain(
                self.pending
                    .iter()
                    .map(|pending| TimelineEntry::Pending(&pending.message)),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs a freshly fetched page. Pending sends survive.
    pub fn replace_history(&mut self, history: Vec<Message>) {
        self.messages.clear();
        self.seen.clear();
        for message in history {
            self.push_confirmed(message);
        }

        let confirmed: HashSet<&ClientMessageId> = self
            .messages
            .iter()
            .filter_map(|message| message.client_id.as_ref())
            .collect();
        self.pending
            .retain(|pending| !confirmed.contains(&pending.client_id));
    }

    /// Appends a confirmed message unless an identical one is already shown.
    pub fn push_confirmed(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.dedup_key()) {
            debug!(channel = %self.channel, "dropping duplicate message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Adds an optimistic entry and returns its correlation id.
    pub fn stage_send(
        &mut self,
        author: impl Into<String>,
        text: impl Into<String>,
        reply_to: Option<RecordId>,
    ) -> ClientMessageId {
        let client_id = ClientMessageId(Uuid::new_v4().to_string());
        let message = Message {
            id: None,
            from: author.into(),
            text: text.into(),
            timestamp: Some(MessageTime::now()),
            reply_to,
            file: None,
            voice_message: None,
            client_id: Some(client_id.clone()),
        };
        self.pending.push(PendingSend {
            client_id: client_id.clone(),
            message,
        });
        client_id
    }

    /// Request body for a staged send.
    pub fn outgoing(&self, client_id: &ClientMessageId) -> Option<OutgoingMessage> {
        let pending = self.find_pending(client_id)?;
        Some(OutgoingMessage {
            reply_to: pending.message.reply_to.clone(),
            client_id: Some(client_id.clone()),
            ..OutgoingMessage::text(self.channel.clone(), pending.message.text.clone())
        })
    }

    /// Settles a staged send. With an echo the echo replaces the pending
    /// entry; without one the entry is dropped and the next history load
    /// brings the stored copy.
    pub fn confirm_send(&mut self, client_id: &ClientMessageId, echoed: Option<Message>) -> bool {
        let Some(pending) = self.take_pending(client_id) else {
            return false;
        };
        if let Some(mut message) = echoed {
            message.client_id.get_or_insert(pending.client_id);
            self.push_confirmed(message);
        }
        true
    }

    /// Drops a staged send and hands back its text for retry.
    pub fn fail_send(&mut self, client_id: &ClientMessageId) -> Option<String> {
        self.take_pending(client_id)
            .map(|pending| pending.message.text)
    }

    /// Applies a live event. Only new messages for this channel change the timeline.
    pub fn apply_event(&mut self, event: &RealtimeEvent) -> bool {
        let RealtimeEvent::NewMessage { channel, message } = event else {
            return false;
        };
        if channel != &self.channel {
            return false;
        }

        if let Some(client_id) = &message.client_id {
            if self.take_pending(client_id).is_some() {
                debug!(channel = %self.channel, %client_id, "pending send echoed");
            }
        }
        self.push_confirmed(message.clone())
    }

    /// Resolves the message a reply points at, when it is in view.
    pub fn reply_preview(&self, message: &Message) -> Option<ReplyPreview> {
        let target = message.reply_to.as_ref()?;
        let parent = self
            .messages
            .iter()
            .find(|candidate| candidate.id.as_ref() == Some(target))?;
        Some(ReplyPreview {
            id: parent.id.clone(),
            from: parent.from.clone(),
            text: parent.text.clone(),
            timestamp: parent.timestamp.clone(),
        })
    }

    fn find_pending(&self, client_id: &ClientMessageId) -> Option<&PendingSend> {
        self.pending
            .iter()
            .find(|pending| &pending.client_id == client_id)
    }

    fn take_pending(&mut self, client_id: &ClientMessageId) -> Option<PendingSend> {
        let index = self
            .pending
            .iter()
            .position(|pending| &pending.client_id == client_id)?;
        Some(self.pending.remove(index))
    }
}

/// Stage, send, then settle. Without an echo the channel history is
/// reloaded. On failure the pending entry is removed and its text comes
/// back inside [`SendFailure`].
pub async fn send_through<C>(
    client: &C,
    timeline: &mut ChannelTimeline,
    author: &str,
    text: &str,
    reply_to: Option<RecordId>,
) -> Result<ClientMessageId, SendFailure>
where
    C: ClientHandle + ?Sized,
{
    let text = text.trim();
    let client_id = timeline.stage_send(author, text, reply_to);
    let Some(outgoing) = timeline.outgoing(&client_id) else {
        return Err(SendFailure {
            text: text.to_string(),
            error: ClientError::InvalidInput("pending send vanished".into()),
        });
    };

    match client.send_message(outgoing).await {
        Ok(ack) => {
            let echoed = ack.echoed_message();
            let reload = echoed.is_none();
            timeline.confirm_send(&client_id, echoed);
            if reload {
                match client
                    .get_messages(timeline.channel(), DEFAULT_PAGE_SIZE, true)
                    .await
                {
                    Ok(history) => timeline.replace_history(history),
                    Err(err) => warn!(channel = %timeline.channel(), "history reload failed: {err}"),
                }
            }
            Ok(client_id)
        }
        Err(error) => {
            let text = timeline
                .fail_send(&client_id)
                .unwrap_or_else(|| text.to_string());
            Err(SendFailure { text, error })
        }
    }
}

/// A send that did not go through, with the text to put back in the composer.
#[derive(Debug, thiserror::Error)]
#[error("failed to send message: {error}")]
pub struct SendFailure {
    pub text: String,
    #[source]
    pub error: ClientError,
}

impl From<SendFailure> for ClientError {
    fn from(failure: SendFailure) -> Self {
        failure.error
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
