use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warelay_core::{
    phone, ChangeKind, Config, Direction, Error, MessageContent, MessageStatus, MessageType,
    Result, StandardMessage,
};
use warelay_notify::ChangeNotifier;
use warelay_provider::{responses, WhatsAppApi};
use warelay_storage::{
    Agent, AgentKind, DirectoryStore, InboundUpsert, MediaStore, MessageRecord, MessageStore,
    NewMessage,
};

use crate::forward;
use crate::resolver::RedirectResolver;

/// Drives every message through the relay: inbound webhooks, agent reply
/// routing, status updates and console sends. Collaborators are injected
/// so tests can run against a fake provider.
pub struct RoutingEngine {
    store: MessageStore,
    directory: DirectoryStore,
    media: MediaStore,
    api: Arc<dyn WhatsAppApi>,
    notifier: ChangeNotifier,
    resolver: RedirectResolver,
    public_url: String,
}

impl RoutingEngine {
    pub fn new(
        store: MessageStore,
        directory: DirectoryStore,
        media: MediaStore,
        api: Arc<dyn WhatsAppApi>,
        notifier: ChangeNotifier,
        config: &Config,
    ) -> Self {
        let resolver = RedirectResolver::new(
            store.clone(),
            directory.clone(),
            config.routing.max_customers_per_day,
            config.routing.max_agents_per_customer,
        );
        Self {
            store,
            directory,
            media,
            api,
            notifier,
            resolver,
            public_url: config.public_url().to_string(),
        }
    }

    pub fn resolver(&self) -> &RedirectResolver {
        &self.resolver
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn directory(&self) -> &DirectoryStore {
        &self.directory
    }

    /// Entry point for the message_receive webhook. Dispatches on whether
    /// the sender is a registered agent; everybody else is a customer.
    pub async fn handle_inbound(&self, msg: StandardMessage) -> Result<()> {
        let sid = msg
            .message_id
            .clone()
            .ok_or_else(|| Error::Validation("Inbound message missing message id".into()))?;

        // Webhook deliveries are at-least-once; this makes them at-most-once.
        if self.store.get_by_sid(&sid)?.is_some() {
            debug!(sid = %sid, "Inbound sid already handled");
            return Ok(());
        }

        let from = phone::with_plus(
            msg.from_number
                .as_deref()
                .ok_or_else(|| Error::Validation("Inbound message missing sender".into()))?,
        );

        match self.directory.agent_by_phone(&from)? {
            Some(agent) => self.handle_agent_reply(&sid, &agent, &from, msg).await,
            None => self.handle_customer_inbound(&sid, &from, msg).await,
        }
    }

    async fn handle_customer_inbound(
        &self,
        sid: &str,
        from: &str,
        msg: StandardMessage,
    ) -> Result<()> {
        // Contact cards are never stored or relayed. The notice goes out as
        // a contact send so the provider gateway swaps in the canned text
        // and points its status callbacks at the discard endpoint.
        if msg.msg_type == MessageType::Contact {
            let notice = StandardMessage::outbound(MessageType::Contact, msg.content, from);
            if let Err(e) = self.api.send_message(&notice).await {
                error!(error = %e, to = %from, "Contact notice failed");
            }
            return Ok(());
        }

        let (customer, _created) = match self.resolver.ensure_customer(from) {
            Ok(v) => v,
            // Budget spent: the message is dropped, the webhook still 200s.
            Err(Error::LimitReached(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let (msg_type, content) = self.localize_media(msg.msg_type, msg.content).await?;

        let agents = self.resolver.agents_for(from)?;
        let agent_names: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();

        let inserted = self.store.upsert_inbound(
            NewMessage {
                sid: sid.to_string(),
                direction: Direction::Inbound,
                client_number: from.to_string(),
                agents_resp: agent_names,
                origin_phone_number: None,
                status: MessageStatus::Received,
                content: content.clone(),
                msg_type,
                is_redirect: false,
            },
            &content.preview(),
        )?;

        let record = match inserted {
            InboundUpsert::Inserted(r) => r,
            InboundUpsert::Duplicate => return Ok(()),
        };

        self.notifier
            .message_change(from, ChangeKind::MsgReceived, record.id);
        self.notifier.unread_update(self.store.total_unread()?);

        for agent in agents {
            let (AgentKind::Phone, Some(agent_number)) = (agent.kind, agent.phone_number.as_deref())
            else {
                continue;
            };

            let parts = forward::to_agent(&customer.display_name, msg_type, &content);
            let mut delivered = true;
            for (part_type, part_content) in parts {
                let out = StandardMessage::outbound(part_type, part_content, agent_number);
                match self.api.send_message(&out).await {
                    Ok(sent) => {
                        let rec = self.store.record_outbound(NewMessage {
                            sid: sent.sid,
                            direction: Direction::Outbound,
                            client_number: agent_number.to_string(),
                            agents_resp: vec![],
                            origin_phone_number: Some(from.to_string()),
                            status: MessageStatus::Pending,
                            content: sent.content,
                            msg_type: sent.msg_type,
                            is_redirect: true,
                        })?;
                        self.notifier
                            .message_change(agent_number, ChangeKind::MsgSent, rec.id);
                    }
                    Err(e) => {
                        error!(error = %e, agent = %agent.name, "Forward to agent failed");
                        delivered = false;
                        break;
                    }
                }
            }

            // A handled-off message no longer counts against the thread.
            if delivered {
                self.store.decrement_unread(from)?;
            }
        }

        self.notifier.unread_update(self.store.total_unread()?);
        Ok(())
    }

    async fn handle_agent_reply(
        &self,
        sid: &str,
        agent: &Agent,
        agent_number: &str,
        msg: StandardMessage,
    ) -> Result<()> {
        if msg.msg_type == MessageType::Contact {
            return self
                .reply_system(agent_number, responses::MEDIA_UNSUPPORTED)
                .await;
        }

        // Record under the agent's own thread, which also gives agent
        // replies the same at-most-once guarantee as customer traffic.
        let inserted = self.store.upsert_inbound(
            NewMessage {
                sid: sid.to_string(),
                direction: Direction::Inbound,
                client_number: agent_number.to_string(),
                agents_resp: vec![agent.name.clone()],
                origin_phone_number: None,
                status: MessageStatus::Received,
                content: msg.content.clone(),
                msg_type: msg.msg_type,
                is_redirect: false,
            },
            &msg.content.preview(),
        )?;
        let record = match inserted {
            InboundUpsert::Inserted(r) => r,
            InboundUpsert::Duplicate => return Ok(()),
        };
        self.notifier
            .message_change(agent_number, ChangeKind::MsgReceived, record.id);

        let customers = self.resolver.customers_for(agent.id)?;
        if customers.is_empty() {
            return self
                .reply_system(agent_number, responses::AGENT_NO_CUSTOMERS)
                .await;
        }

        let (target, content) = if customers.len() == 1 {
            (customers[0].clone(), msg.content.clone())
        } else {
            if !forward::can_address(msg.msg_type, &msg.content) {
                return self
                    .reply_system(agent_number, responses::MEDIA_UNSUPPORTED)
                    .await;
            }
            let Some(line) = forward::address_line(&msg.content) else {
                return self
                    .reply_system(agent_number, responses::INVALID_CUSTOMER_ID)
                    .await;
            };
            let Some(customer) = self.store.customer_by_display_name(&line)? else {
                return self
                    .reply_system(agent_number, responses::INVALID_CUSTOMER_ID)
                    .await;
            };
            if !customers.contains(&customer.number) {
                return self
                    .reply_system(agent_number, responses::CUSTOMER_NOT_ASSIGNED)
                    .await;
            }
            let stripped = forward::strip_address_line(msg.msg_type, &msg.content);
            // A bare name with no body after it leaves nothing to forward.
            if msg.msg_type == MessageType::Text && stripped.body().unwrap_or("").is_empty() {
                return self
                    .reply_system(agent_number, responses::CUSTOMER_NOT_ASSIGNED)
                    .await;
            }
            (customer.number, stripped)
        };

        let out = StandardMessage::outbound(msg.msg_type, content, &target);
        match self.api.send_message(&out).await {
            Ok(sent) => {
                let rec = self.store.record_outbound(NewMessage {
                    sid: sent.sid,
                    direction: Direction::Outbound,
                    client_number: target.clone(),
                    agents_resp: vec![agent.name.clone()],
                    origin_phone_number: Some(agent_number.to_string()),
                    status: MessageStatus::Pending,
                    content: sent.content,
                    msg_type: sent.msg_type,
                    is_redirect: true,
                })?;
                info!(agent = %agent.name, customer = %target, "Agent reply forwarded");
                self.notifier
                    .message_change(&target, ChangeKind::MsgSent, rec.id);
            }
            Err(e) => {
                error!(error = %e, agent = %agent.name, "Agent reply forward failed");
            }
        }
        Ok(())
    }

    /// Entry point for the message_status_update webhook. Unknown sids are
    /// dropped. A failed forward additionally notifies the origin sender.
    pub async fn handle_status(&self, sid: &str, status: MessageStatus) -> Result<()> {
        let Some(record) = self.store.apply_status(sid, status)? else {
            return Ok(());
        };

        self.notifier
            .message_change(&record.client_number, ChangeKind::MsgStatUpdate, record.id);

        if status == MessageStatus::Failed && record.is_redirect {
            if let Some(origin) = record.origin_phone_number.clone() {
                warn!(sid = %sid, origin = %origin, "Forwarded message failed, notifying origin");
                let body = record.content.body().unwrap_or("").to_string();
                self.reply_system(&origin, &responses::resend_failed(&body))
                    .await?;
            }
        }
        Ok(())
    }

    /// Console send: an operator messages a customer directly.
    pub async fn send_to_number(
        &self,
        number: &str,
        msg_type: MessageType,
        content: MessageContent,
    ) -> Result<MessageRecord> {
        let out = StandardMessage::outbound(msg_type, content, number);
        let sent = self.api.send_message(&out).await?;

        let agent_names: Vec<String> = self
            .resolver
            .agents_for(number)?
            .iter()
            .map(|a| a.name.clone())
            .collect();

        let rec = self.store.record_outbound(NewMessage {
            sid: sent.sid,
            direction: Direction::Outbound,
            client_number: number.to_string(),
            agents_resp: agent_names,
            origin_phone_number: None,
            status: if sent.status_discarded {
                MessageStatus::Sent
            } else {
                MessageStatus::Pending
            },
            content: sent.content,
            msg_type: sent.msg_type,
            is_redirect: false,
        })?;

        self.notifier
            .message_change(number, ChangeKind::MsgSent, rec.id);
        Ok(rec)
    }

    /// Console viewed a thread: clear its unread count and refresh the
    /// fleet total.
    pub fn mark_read(&self, number: &str) -> Result<()> {
        self.store.reset_unread(number)?;
        self.notifier.unread_update(self.store.total_unread()?);
        Ok(())
    }

    /// Fetch provider-hosted media and rehost it locally. A failed fetch
    /// downgrades the message to text so the thread still shows something.
    async fn localize_media(
        &self,
        msg_type: MessageType,
        content: MessageContent,
    ) -> Result<(MessageType, MessageContent)> {
        if !msg_type.is_media() {
            return Ok((msg_type, content));
        }
        let MessageContent::Media { media_url, caption } = &content else {
            return Ok((msg_type, content));
        };

        match self.api.fetch_inbound_media(media_url).await {
            Some((bytes, subtype)) => {
                let filename = self.media.save(&bytes, &subtype, media_url).await?;
                let local_url = format!("{}/media/{}", self.public_url, filename);
                Ok((msg_type, MessageContent::media(local_url, caption.clone())))
            }
            None => Ok((
                MessageType::Text,
                MessageContent::text(responses::MEDIA_DOWNLOAD_FAILURE),
            )),
        }
    }

    async fn reply_system(&self, to: &str, text: &str) -> Result<()> {
        let out = StandardMessage::outbound(MessageType::Text, MessageContent::text(text), to);
        match self.api.send_message(&out).await {
            Ok(sent) => {
                let rec = self.store.record_outbound(NewMessage {
                    sid: sent.sid,
                    direction: Direction::Outbound,
                    client_number: to.to_string(),
                    agents_resp: vec![],
                    origin_phone_number: None,
                    status: MessageStatus::Pending,
                    content: sent.content,
                    msg_type: sent.msg_type,
                    is_redirect: false,
                })?;
                self.notifier.message_change(to, ChangeKind::MsgSent, rec.id);
            }
            Err(e) => {
                error!(error = %e, to = %to, "System reply failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;
    use warelay_provider::SentMessage;

    struct FakeApi {
        sent: Mutex<Vec<StandardMessage>>,
        media: Option<(Vec<u8>, String)>,
        fail_send: bool,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                sent: Mutex::new(vec![]),
                media: Some((b"bytes".to_vec(), "jpeg".to_string())),
                fail_send: false,
            }
        }

        fn sent(&self) -> Vec<StandardMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WhatsAppApi for FakeApi {
        async fn send_message(&self, msg: &StandardMessage) -> Result<SentMessage> {
            if self.fail_send {
                return Err(Error::Provider("provider down".into()));
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(SentMessage {
                sid: Uuid::new_v4().to_string(),
                msg_type: msg.msg_type,
                content: msg.content.clone(),
                status_discarded: false,
            })
        }

        async fn fetch_inbound_media(&self, _media_url: &str) -> Option<(Vec<u8>, String)> {
            self.media.clone()
        }
    }

    struct Harness {
        engine: RoutingEngine,
        api: Arc<FakeApi>,
        _dir: TempDir,
    }

    fn harness_with(api: FakeApi, max_customers_per_day: u32) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("messages.db")).unwrap();
        let directory = DirectoryStore::open(&dir.path().join("directory.db")).unwrap();
        let media = MediaStore::new(&dir.path().join("media")).unwrap();

        let mut config = Config::default();
        config.gateway.public_url = "http://localhost:18890".to_string();
        config.routing.max_customers_per_day = max_customers_per_day;

        let api = Arc::new(api);
        let engine = RoutingEngine::new(
            store,
            directory,
            media,
            api.clone(),
            ChangeNotifier::new(),
            &config,
        );
        Harness {
            engine,
            api,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeApi::new(), 50)
    }

    fn inbound_text(sid: &str, from: &str, text: &str) -> StandardMessage {
        StandardMessage {
            message_id: Some(sid.to_string()),
            msg_type: MessageType::Text,
            content: MessageContent::text(text),
            from_number: Some(from.to_string()),
            to_number: None,
            status: Some(MessageStatus::Received),
        }
    }

    #[tokio::test]
    async fn test_inbound_is_idempotent() {
        let h = harness();
        h.engine
            .handle_inbound(inbound_text("s1", "+15550000001", "hi"))
            .await
            .unwrap();
        h.engine
            .handle_inbound(inbound_text("s1", "+15550000001", "hi"))
            .await
            .unwrap();

        let msgs = h.engine.store().messages_for_number("+15550000001").unwrap();
        assert_eq!(msgs.len(), 1);
        let customer = h
            .engine
            .store()
            .customer_by_number("+15550000001")
            .unwrap()
            .unwrap();
        assert_eq!(customer.unread_msgs, 1);
    }

    #[tokio::test]
    async fn test_forward_to_agent_carries_name_prefix_and_clears_unread() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();

        // Pre-register the customer so we can attach the rule first.
        let (customer, _) = h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15550000001", "need help"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15551110001"));
        assert_eq!(
            sent[0].content.body(),
            Some(format!("*{}*:\nneed help", customer.display_name).as_str())
        );

        // Forwarded away, so the thread shows as handled.
        let customer = h
            .engine
            .store()
            .customer_by_number("+15550000001")
            .unwrap()
            .unwrap();
        assert_eq!(customer.unread_msgs, 0);
    }

    #[tokio::test]
    async fn test_agent_reply_single_customer_goes_direct() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "on my way"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15550000001"));
        assert_eq!(sent[0].content.body(), Some("on my way"));
    }

    #[tokio::test]
    async fn test_agent_reply_addresses_by_display_name() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        let (alice, _) = h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().ensure_customer("+15550000002").unwrap();
        h.engine
            .store()
            .rename_customer(&alice.customer_id, "Alice")
            .unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();
        h.engine.resolver().create_rule("+15550000002", bob.id).unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "alice\nhello"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15550000001"));
        assert_eq!(sent[0].content.body(), Some("hello"));
    }

    #[tokio::test]
    async fn test_agent_reply_with_unknown_name_gets_system_reply() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().ensure_customer("+15550000002").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();
        h.engine.resolver().create_rule("+15550000002", bob.id).unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "nobody\nhello"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15551110001"));
        assert_eq!(sent[0].content.body(), Some(responses::INVALID_CUSTOMER_ID));
    }

    #[tokio::test]
    async fn test_agent_one_line_reply_resolves_through_name_lookup() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        let (alice, _) = h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().ensure_customer("+15550000002").unwrap();
        h.engine
            .store()
            .rename_customer(&alice.customer_id, "Alice")
            .unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();
        h.engine.resolver().create_rule("+15550000002", bob.id).unwrap();

        // A single line that names nobody is an addressing error, not a
        // media problem.
        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "carol"))
            .await
            .unwrap();
        let sent = h.api.sent();
        assert_eq!(sent.last().unwrap().to_number.as_deref(), Some("+15551110001"));
        assert_eq!(
            sent.last().unwrap().content.body(),
            Some(responses::INVALID_CUSTOMER_ID)
        );

        // A matching name with nothing after it has no body to forward.
        h.engine
            .handle_inbound(inbound_text("s2", "+15551110001", "alice"))
            .await
            .unwrap();
        let sent = h.api.sent();
        assert_eq!(
            sent.last().unwrap().content.body(),
            Some(responses::CUSTOMER_NOT_ASSIGNED)
        );
    }

    #[tokio::test]
    async fn test_agent_reply_to_foreign_customer_is_refused() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        let eve = h
            .engine
            .directory()
            .add_agent("Eve", AgentKind::Phone, Some("+15551110002"))
            .unwrap();
        let (alice, _) = h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().ensure_customer("+15550000002").unwrap();
        h.engine.resolver().ensure_customer("+15550000003").unwrap();
        h.engine
            .store()
            .rename_customer(&alice.customer_id, "Alice")
            .unwrap();
        // Alice belongs to Eve; Bob has two other customers.
        h.engine.resolver().create_rule("+15550000001", eve.id).unwrap();
        h.engine.resolver().create_rule("+15550000002", bob.id).unwrap();
        h.engine.resolver().create_rule("+15550000003", bob.id).unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "alice\nhello"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15551110001"));
        assert_eq!(
            sent[0].content.body(),
            Some(responses::CUSTOMER_NOT_ASSIGNED)
        );
    }

    #[tokio::test]
    async fn test_agent_with_no_customers_gets_notice() {
        let h = harness();
        h.engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();

        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "hello?"))
            .await
            .unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content.body(), Some(responses::AGENT_NO_CUSTOMERS));
    }

    #[tokio::test]
    async fn test_inbound_contact_card_gets_notice_and_no_forward() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();

        let msg = StandardMessage {
            message_id: Some("s1".to_string()),
            msg_type: MessageType::Contact,
            content: MessageContent::text("Contact card"),
            from_number: Some("+15550000001".to_string()),
            to_number: None,
            status: Some(MessageStatus::Received),
        };
        h.engine.handle_inbound(msg).await.unwrap();

        // The notice goes back out as a contact send, which the real
        // gateway substitutes and routes to the discard callback.
        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15550000001"));
        assert_eq!(sent[0].msg_type, MessageType::Contact);

        // Nothing lands in the thread and nothing shows as unread.
        assert!(h
            .engine
            .store()
            .messages_for_number("+15550000001")
            .unwrap()
            .is_empty());
        let customer = h
            .engine
            .store()
            .customer_by_number("+15550000001")
            .unwrap()
            .unwrap();
        assert_eq!(customer.unread_msgs, 0);
    }

    #[tokio::test]
    async fn test_agent_contact_card_is_refused_without_storing() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();

        let msg = StandardMessage {
            message_id: Some("s1".to_string()),
            msg_type: MessageType::Contact,
            content: MessageContent::text("Contact card"),
            from_number: Some("+15551110001".to_string()),
            to_number: None,
            status: Some(MessageStatus::Received),
        };
        h.engine.handle_inbound(msg).await.unwrap();

        let sent = h.api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_number.as_deref(), Some("+15551110001"));
        assert_eq!(sent[0].content.body(), Some(responses::MEDIA_UNSUPPORTED));

        // Only the outbound notice sits in the agent's thread.
        let msgs = h.engine.store().messages_for_number("+15551110001").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].direction, Direction::Outbound);
    }

    #[tokio::test]
    async fn test_failed_media_fetch_downgrades_to_text() {
        let mut api = FakeApi::new();
        api.media = None;
        let h = harness_with(api, 50);

        let msg = StandardMessage {
            message_id: Some("s1".to_string()),
            msg_type: MessageType::Image,
            content: MessageContent::media("https://provider/media/1", None),
            from_number: Some("+15550000001".to_string()),
            to_number: None,
            status: Some(MessageStatus::Received),
        };
        h.engine.handle_inbound(msg).await.unwrap();

        let msgs = h.engine.store().messages_for_number("+15550000001").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type, MessageType::Text);
        assert_eq!(
            msgs[0].content.body(),
            Some(responses::MEDIA_DOWNLOAD_FAILURE)
        );
    }

    #[tokio::test]
    async fn test_fetched_media_is_rehosted_locally() {
        let h = harness();
        let msg = StandardMessage {
            message_id: Some("s1".to_string()),
            msg_type: MessageType::Image,
            content: MessageContent::media("https://provider/media/pic1", Some("look".into())),
            from_number: Some("+15550000001".to_string()),
            to_number: None,
            status: Some(MessageStatus::Received),
        };
        h.engine.handle_inbound(msg).await.unwrap();

        let msgs = h.engine.store().messages_for_number("+15550000001").unwrap();
        let MessageContent::Media { media_url, caption } = &msgs[0].content else {
            panic!("expected media content");
        };
        assert!(media_url.starts_with("http://localhost:18890/media/pic1_"));
        assert!(media_url.ends_with(".jpeg"));
        assert_eq!(caption.as_deref(), Some("look"));
    }

    #[tokio::test]
    async fn test_daily_budget_drops_unknown_numbers() {
        let h = harness_with(FakeApi::new(), 1);
        h.engine
            .handle_inbound(inbound_text("s1", "+15550000001", "first"))
            .await
            .unwrap();
        h.engine
            .handle_inbound(inbound_text("s2", "+15550000002", "second"))
            .await
            .unwrap();

        assert!(h
            .engine
            .store()
            .customer_by_number("+15550000002")
            .unwrap()
            .is_none());
        assert!(h
            .engine
            .store()
            .has_announcement(responses::DAILY_LIMIT_ANNOUNCEMENT)
            .unwrap());

        // Known numbers still get through.
        h.engine
            .handle_inbound(inbound_text("s3", "+15550000001", "again"))
            .await
            .unwrap();
        assert_eq!(
            h.engine.store().messages_for_number("+15550000001").unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_status_update_is_last_write_wins() {
        let h = harness();
        let rec = h
            .engine
            .send_to_number(
                "+15550000001",
                MessageType::Text,
                MessageContent::text("hi"),
            )
            .await
            .unwrap();

        h.engine.handle_status(&rec.sid, MessageStatus::Read).await.unwrap();
        h.engine
            .handle_status(&rec.sid, MessageStatus::Delivered)
            .await
            .unwrap();

        let rec = h.engine.store().get_by_sid(&rec.sid).unwrap().unwrap();
        assert_eq!(rec.status, MessageStatus::Delivered);

        // Unknown sid is a no-op.
        h.engine
            .handle_status("no-such-sid", MessageStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_forward_notifies_origin_agent() {
        let h = harness();
        let bob = h
            .engine
            .directory()
            .add_agent("Bob", AgentKind::Phone, Some("+15551110001"))
            .unwrap();
        h.engine.resolver().ensure_customer("+15550000001").unwrap();
        h.engine.resolver().create_rule("+15550000001", bob.id).unwrap();

        // Bob replies, reaching his single customer.
        h.engine
            .handle_inbound(inbound_text("s1", "+15551110001", "on my way"))
            .await
            .unwrap();
        let forward_sid = {
            let msgs = h.engine.store().messages_for_number("+15550000001").unwrap();
            msgs.last().unwrap().sid.clone()
        };

        h.engine
            .handle_status(&forward_sid, MessageStatus::Failed)
            .await
            .unwrap();

        let sent = h.api.sent();
        let notice = sent.last().unwrap();
        assert_eq!(notice.to_number.as_deref(), Some("+15551110001"));
        assert!(notice
            .content
            .body()
            .unwrap()
            .contains("on my way"));
    }

    #[tokio::test]
    async fn test_mark_read_resets_thread() {
        let h = harness();
        h.engine
            .handle_inbound(inbound_text("s1", "+15550000001", "hi"))
            .await
            .unwrap();
        h.engine.mark_read("+15550000001").unwrap();
        let customer = h
            .engine
            .store()
            .customer_by_number("+15550000001")
            .unwrap()
            .unwrap();
        assert_eq!(customer.unread_msgs, 0);
    }
}
