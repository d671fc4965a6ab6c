//! The live BOS session: bring-up, the receive loop, and the tasks that answer users.
//!
//! Tasks: a reader pulling frames off the connection, the receive loop (dispatches them and owns
//! the context store), one sender draining the outbound queue in order, one heartbeat, a
//! short-lived response task per answered IM, and one per warning reaction.
//! The receive loop never waits on the queue itself; frames it originates are handed to a
//! detached task.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant};

use super::context::{ChatContext, ContextStore, ResponseGuard};
use super::outbound::{retaliates, warning_prompt, Outbound, MESSAGE_TOO_LONG, TOO_MANY_MESSAGES};
use super::policy::{strip_html_tags, Admission, SizeLimits};
use crate::bot::{BotError, ChatBot, Exchange};
use crate::config::LimitsConfig;
use crate::wire::{
    food_group, icbm, login_tag, oservice, Decode, FlapClient, FlapFrame, FlapReader, FlapWriter,
    FrameType, IcbmChannelMsgToClient, OServiceClientOnline, OServiceEvilNotification,
    OServiceHostOnline, SnacFrame, Tlv, TlvList, WireError,
};

/// Capacity of the outbound queue; producers wait when it is full.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 10;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("unable to get response from bot: {0}")]
    Bot(#[from] BotError),
    #[error("sender task stopped")]
    SenderStopped,
    #[error("warning task failed: {0}")]
    WarningTask(#[from] JoinError),
}

/// Limits the session applies per correspondent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLimits {
    pub max_msg_per_min: u32,
    pub size: SizeLimits,
    pub reply_timeout: Option<Duration>,
}

impl From<&LimitsConfig> for ChatLimits {
    fn from(c: &LimitsConfig) -> Self {
        Self {
            max_msg_per_min: c.max_msg_per_min,
            size: SizeLimits {
                word_count: c.word_count_limit,
                word_length: c.word_length_limit,
            },
            reply_timeout: c.reply_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Sign on to the BOS host with `cookie` and answer IMs until the server ends the session.
///
/// Returns `Ok(())` on signoff or a clean close; any read, decode, or send failure is returned
/// as an error and the caller decides whether to start over.
pub async fn chat<R, W>(
    mut flapc: FlapClient<R, W>,
    cookie: Bytes,
    bot: Arc<dyn ChatBot>,
    limits: ChatLimits,
) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    flapc.receive_signon_frame().await?;
    flapc
        .send_signon_frame(&TlvList::new().with(Tlv::new(login_tag::LOGIN_COOKIE, cookie)))
        .await?;
    flapc.receive_snac::<OServiceHostOnline>().await?;
    flapc.send_snac(&OServiceClientOnline::default()).await?;

    let (reader, writer) = flapc.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let sender = tokio::spawn(send_snacs(writer, rx));
    let heartbeat = tokio::spawn(send_heartbeats(tx.clone(), HEARTBEAT_INTERVAL));
    let dispatcher = Dispatcher::new(tx, bot, limits);

    log::info!("listening for incoming IMs");
    let result = listen(reader, dispatcher, sender).await;
    heartbeat.abort();
    result
}

async fn listen<R>(
    reader: FlapReader<R>,
    mut dispatcher: Dispatcher,
    mut sender: JoinHandle<()>,
) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (frames_tx, mut frames) = mpsc::channel(1);
    let reading = tokio::spawn(read_frames(reader, frames_tx));

    let result = loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame.unwrap_or(Err(WireError::Closed)),
            _ = &mut sender => break Err(ChatError::SenderStopped),
            Some(reaction) = dispatcher.warning_finished() => match reaction {
                Ok(()) => continue,
                Err(e) => break Err(e),
            },
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(WireError::Closed) => {
                log::info!("server closed the connection");
                break Ok(());
            }
            Err(e) => break Err(e.into()),
        };
        match frame.frame_type {
            FrameType::Signoff => {
                log::info!("server signed us off");
                break Ok(());
            }
            FrameType::Data => {}
            // non-data frame, nothing to do here
            _ => continue,
        }
        if let Err(e) = dispatcher.dispatch(frame.payload).await {
            break Err(e);
        }
    };
    reading.abort();
    sender.abort();
    result
}

/// Forwards frames from the connection until the first read error, which is forwarded too.
async fn read_frames<R>(mut reader: FlapReader<R>, frames: mpsc::Sender<Result<FlapFrame, WireError>>)
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let frame = reader.receive_flap().await;
        let failed = frame.is_err();
        if frames.send(frame).await.is_err() || failed {
            return;
        }
    }
}

/// Writes queued frames to the connection in order. Stops at the first failed write.
async fn send_snacs<W>(mut writer: FlapWriter<W>, mut rx: mpsc::Receiver<Outbound>)
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(out) = rx.recv().await {
        let frame = out.frame();
        if let Err(e) = out.write_to(&mut writer).await {
            log::error!("error sending SNAC {}: {}", frame, e);
            return;
        }
        log::debug!("sent SNAC {}", frame);
    }
}

async fn send_heartbeats(tx: mpsc::Sender<Outbound>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if tx.send(Outbound::Heartbeat).await.is_err() {
            return;
        }
    }
}

/// Receive-loop state: classifies data frames and runs the IM and warning handlers.
pub struct Dispatcher {
    contexts: ContextStore,
    outbound: mpsc::Sender<Outbound>,
    bot: Arc<dyn ChatBot>,
    limits: ChatLimits,
    warnings: JoinSet<Result<(), ChatError>>,
}

impl Dispatcher {
    pub fn new(outbound: mpsc::Sender<Outbound>, bot: Arc<dyn ChatBot>, limits: ChatLimits) -> Self {
        Self {
            contexts: ContextStore::new(limits.max_msg_per_min),
            outbound,
            bot,
            limits,
            warnings: JoinSet::new(),
        }
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Decode a data frame payload and route it by classification.
    pub async fn dispatch(&mut self, mut payload: Bytes) -> Result<(), ChatError> {
        let frame = SnacFrame::decode(&mut payload)?;
        log::debug!("received SNAC {}", frame);
        match (frame.food_group, frame.sub_group) {
            (food_group::ICBM, icbm::CHANNEL_MSG_TO_CLIENT) => {
                let msg = IcbmChannelMsgToClient::decode(&mut payload)?;
                self.handle_incoming_message(msg).await
            }
            (food_group::OSERVICE, oservice::EVIL_NOTIFICATION) => {
                let notice = OServiceEvilNotification::decode(&mut payload)?;
                self.handle_warning(notice).await
            }
            _ => Ok(()),
        }
    }

    /// Answer an IM, unless a reply to this user is in flight or a limit says otherwise.
    pub async fn handle_incoming_message(&mut self, msg: IcbmChannelMsgToClient) -> Result<(), ChatError> {
        let screen_name = msg.screen_name().to_string();
        let ctx = self.contexts.get_or_create(&screen_name, msg.cookie);
        ctx.set_cookie(msg.cookie);

        let Some(guard) = ctx.try_lock() else {
            log::debug!("still responding to {}, dropping message", screen_name);
            return Ok(());
        };

        if let Admission::Dropped { notify } = ctx.admit().await {
            log::info!("user hit message rate limit: screen_name={}", screen_name);
            if notify {
                self.notify(msg.cookie, &screen_name, TOO_MANY_MESSAGES);
            }
            return Ok(());
        }

        let Some(text) = msg.message_text()? else {
            log::debug!("received ICBMChannelMsgToClient with no AOLIMData");
            return Ok(());
        };
        let text = strip_html_tags(&text);

        if self.limits.size.exceeded_by(&text) {
            log::info!("user hit message size limit: screen_name={}", screen_name);
            self.notify(msg.cookie, &screen_name, MESSAGE_TOO_LONG);
            return Ok(());
        }

        tokio::spawn(respond(
            guard,
            Arc::clone(&self.bot),
            self.outbound.clone(),
            msg,
            text,
            self.limits.reply_timeout,
        ));
        Ok(())
    }

    /// React to a warning from a user we have chatted with; the 3rd warning gets one back.
    ///
    /// The reaction runs in its own task once the user's slot is free, so a reply in flight
    /// never holds up the receive loop. Its outcome comes back through [`Self::warning_finished`].
    pub async fn handle_warning(&mut self, notice: OServiceEvilNotification) -> Result<(), ChatError> {
        let Some(screen_name) = notice.sender() else {
            log::debug!("anonymous warning, moving on");
            return Ok(());
        };
        let Some(ctx) = self.contexts.get(screen_name) else {
            log::debug!("can't find chat context for {}, moving on", screen_name);
            return Ok(());
        };
        self.warnings.spawn(react_to_warning(
            ctx,
            screen_name.to_string(),
            Arc::clone(&self.bot),
            self.outbound.clone(),
            self.limits.reply_timeout,
        ));
        Ok(())
    }

    /// Wait for the next warning reaction to finish. `None` when none are running.
    pub async fn warning_finished(&mut self) -> Option<Result<(), ChatError>> {
        let joined = self.warnings.join_next().await?;
        Some(joined.map_err(ChatError::from).and_then(|r| r))
    }

    /// Queue a notice from a detached task, like every frame the receive loop originates.
    /// The caller does not wait for it to reach the outbound queue.
    fn notify(&self, cookie: u64, screen_name: &str, text: &str) {
        match Outbound::message(cookie, screen_name, text) {
            Ok(out) => self.enqueue_detached(vec![out]),
            Err(e) => log::error!("unable to compose notice for {}: {}", screen_name, e),
        }
    }

    /// Queue `frames` in order from a separate task so the receive loop never blocks on a full
    /// queue.
    fn enqueue_detached(&self, frames: Vec<Outbound>) {
        let tx = self.outbound.clone();
        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    log::error!("outbound queue closed, dropping frame");
                    return;
                }
            }
        });
    }
}

/// Warning reaction: waits for the user's slot so the conversation is updated by one task at a
/// time, then asks the bot and queues the reply (plus a warning back on the 3rd).
async fn react_to_warning(
    ctx: Arc<ChatContext>,
    screen_name: String,
    bot: Arc<dyn ChatBot>,
    outbound: mpsc::Sender<Outbound>,
    timeout: Option<Duration>,
) -> Result<(), ChatError> {
    let Some(guard) = ctx.lock().await else {
        return Ok(());
    };

    let warn_count = guard.add_warning().await;
    log::info!("warned by {} ({} so far)", screen_name, warn_count);
    let prompt = warning_prompt(warn_count);
    let last = guard.last_exchange().await;
    let reply = ask(bot.as_ref(), prompt, &last, timeout).await?;

    let mut frames = vec![Outbound::message(ctx.cookie(), &screen_name, &reply)?];
    guard.record_exchange(prompt.to_string(), reply).await;
    if retaliates(warn_count) {
        log::info!("warning {} back", screen_name);
        frames.push(Outbound::warn(&screen_name));
    }

    // queued while still holding the slot, so back-to-back warnings keep their order
    for frame in frames {
        if outbound.send(frame).await.is_err() {
            log::error!("outbound queue closed, dropping frame");
            break;
        }
    }
    Ok(())
}

async fn ask(
    bot: &dyn ChatBot,
    send: &str,
    last: &Exchange,
    timeout: Option<Duration>,
) -> Result<String, BotError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, bot.exchange_message(send, last))
            .await
            .map_err(|_| BotError::Timeout(limit))?,
        None => bot.exchange_message(send, last).await,
    }
}

/// One response task. Holds the user's slot until it returns, on every path.
async fn respond(
    guard: ResponseGuard,
    bot: Arc<dyn ChatBot>,
    outbound: mpsc::Sender<Outbound>,
    msg: IcbmChannelMsgToClient,
    text: String,
    timeout: Option<Duration>,
) {
    let screen_name = msg.screen_name();

    // shows "typing" in the user's IM window while the bot thinks
    if msg.wants_events() && outbound.send(Outbound::typing(&msg)).await.is_err() {
        log::error!("unable to send typing event: outbound queue closed");
        return;
    }

    let last = guard.last_exchange().await;
    let reply = match ask(bot.as_ref(), &text, &last, timeout).await {
        Ok(reply) => reply,
        Err(e) => {
            log::error!("unable to get response from bot: {}", e);
            return;
        }
    };

    let out = match Outbound::message(msg.cookie, screen_name, &reply) {
        Ok(out) => out,
        Err(e) => {
            log::error!("unable to compose response: {}", e);
            return;
        }
    };
    if outbound.send(out).await.is_err() {
        log::error!("unable to send response: outbound queue closed");
        return;
    }

    log::info!(
        "message exchange: screen_name={} incoming={:?} outgoing={:?}",
        screen_name,
        text,
        reply
    );
    guard.record_exchange(text, reply).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscar::outbound::wrap_html;
    use crate::oscar::policy::RATE_WINDOW;
    use crate::wire::{compose_im_data, UserInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every call, tracks concurrency, and replies "reply N".
    #[derive(Default)]
    struct RecordingBot {
        calls: Mutex<Vec<(String, Exchange)>>,
        delay: Duration,
        fail: bool,
        hang_on: Option<&'static str>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingBot {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn hanging_on(message: &'static str) -> Self {
            Self {
                hang_on: Some(message),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, Exchange)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBot for RecordingBot {
        async fn exchange_message(&self, send: &str, last_exchange: &Exchange) -> Result<String, BotError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((send.to_string(), last_exchange.clone()));
                calls.len()
            };
            if self.hang_on.is_some_and(|m| m == send) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(BotError::Api("boom".to_string()));
            }
            Ok(format!("reply {}", n))
        }
    }

    fn limits(max_msg_per_min: u32, word_count: usize, word_length: usize) -> ChatLimits {
        ChatLimits {
            max_msg_per_min,
            size: SizeLimits {
                word_count,
                word_length,
            },
            reply_timeout: None,
        }
    }

    fn generous() -> ChatLimits {
        limits(1000, 1000, 1000)
    }

    fn setup(bot: Arc<RecordingBot>, limits: ChatLimits) -> (Dispatcher, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (Dispatcher::new(tx, bot, limits), rx)
    }

    fn im(from: &str, cookie: u64, text: &str) -> IcbmChannelMsgToClient {
        IcbmChannelMsgToClient {
            cookie,
            channel_id: 1,
            sender: UserInfo::new(from),
            tlvs: TlvList::new().with(Tlv::new(icbm::TLV_AOL_IM_DATA, compose_im_data(text).unwrap())),
        }
    }

    fn warning(from: &str) -> OServiceEvilNotification {
        OServiceEvilNotification {
            new_evil: 30,
            snitcher: Some(UserInfo::new(from)),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("outbound queue closed")
    }

    async fn assert_quiet(rx: &mut mpsc::Receiver<Outbound>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected outbound frame");
    }

    async fn wait_idle(d: &Dispatcher, screen_name: &str) {
        let ctx = d.contexts().get(screen_name).expect("context exists");
        for _ in 0..500 {
            if !ctx.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("context for {screen_name} stayed busy");
    }

    async fn last_exchange(d: &Dispatcher, screen_name: &str) -> Exchange {
        let ctx = d.contexts().get(screen_name).unwrap();
        ctx.try_lock().unwrap().last_exchange().await
    }

    #[tokio::test]
    async fn hello_from_alice_gets_a_wrapped_reply() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 77, "hello")).await.unwrap();

        let out = next(&mut rx).await;
        assert_eq!(out.recipient(), Some("alice"));
        assert_eq!(out.text(), Some(wrap_html("reply 1")));
        match &out {
            Outbound::Message(m) => assert_eq!(m.cookie, 77),
            other => panic!("unexpected {other:?}"),
        }
        wait_idle(&d, "alice").await;

        assert_eq!(bot.calls(), vec![("hello".to_string(), Exchange::default())]);
        assert_eq!(last_exchange(&d, "alice").await, Exchange::new("hello", "reply 1"));
    }

    #[tokio::test]
    async fn next_message_sees_previous_exchange_and_markup_is_stripped() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "hello")).await.unwrap();
        next(&mut rx).await;
        wait_idle(&d, "alice").await;

        d.handle_incoming_message(im("alice", 2, "<FONT COLOR=\"#000\">how <b>are</b> you</FONT>"))
            .await
            .unwrap();
        next(&mut rx).await;
        wait_idle(&d, "alice").await;

        let calls = bot.calls();
        assert_eq!(calls[1], ("how are you".to_string(), Exchange::new("hello", "reply 1")));
        assert_eq!(d.contexts().get("alice").unwrap().cookie(), 2);
    }

    #[tokio::test]
    async fn typing_event_precedes_reply_when_requested() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(bot, generous());

        let mut msg = im("alice", 5, "hi");
        msg.tlvs.push(Tlv::new(icbm::TLV_WANT_EVENTS, Bytes::new()));
        d.handle_incoming_message(msg).await.unwrap();

        assert!(matches!(next(&mut rx).await, Outbound::Typing(e) if e.cookie == 5 && e.event == icbm::EVENT_TYPING_BEGUN));
        assert!(matches!(next(&mut rx).await, Outbound::Message(_)));
    }

    #[tokio::test]
    async fn message_is_dropped_while_a_reply_is_in_flight() {
        let bot = Arc::new(RecordingBot::with_delay(Duration::from_millis(100)));
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "first")).await.unwrap();
        d.handle_incoming_message(im("alice", 2, "second")).await.unwrap();
        d.handle_incoming_message(im("alice", 3, "third")).await.unwrap();

        next(&mut rx).await;
        wait_idle(&d, "alice").await;
        assert_quiet(&mut rx).await;
        assert_eq!(bot.calls().len(), 1);
        assert_eq!(bot.calls()[0].0, "first");
        // the cookie still tracks the latest message
        assert_eq!(d.contexts().get("alice").unwrap().cookie(), 3);
    }

    #[tokio::test]
    async fn different_users_are_answered_concurrently() {
        let bot = Arc::new(RecordingBot::with_delay(Duration::from_millis(50)));
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "hi")).await.unwrap();
        d.handle_incoming_message(im("bob", 2, "hi")).await.unwrap();

        let mut recipients = vec![
            next(&mut rx).await.recipient().unwrap().to_string(),
            next(&mut rx).await.recipient().unwrap().to_string(),
        ];
        recipients.sort();
        assert_eq!(recipients, ["alice", "bob"]);
        assert_eq!(bot.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_message_in_a_minute_gets_one_slow_down_notice() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), limits(10, 1000, 1000));

        for i in 0..10 {
            d.handle_incoming_message(im("alice", i, "hey")).await.unwrap();
            next(&mut rx).await;
            wait_idle(&d, "alice").await;
        }

        d.handle_incoming_message(im("alice", 11, "hey")).await.unwrap();
        let notice = next(&mut rx).await;
        assert_eq!(notice.text(), Some(wrap_html(TOO_MANY_MESSAGES)));

        d.handle_incoming_message(im("alice", 12, "hey")).await.unwrap();
        d.handle_incoming_message(im("alice", 13, "hey")).await.unwrap();
        assert_quiet(&mut rx).await;
        assert_eq!(bot.calls().len(), 10);

        tokio::time::advance(RATE_WINDOW).await;
        d.handle_incoming_message(im("alice", 14, "back")).await.unwrap();
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html("reply 11")));
    }

    #[tokio::test]
    async fn too_many_words_is_rejected_without_calling_the_bot() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), limits(1000, 3, 5));

        d.handle_incoming_message(im("alice", 1, "aa bb cc dd")).await.unwrap();
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html(MESSAGE_TOO_LONG)));

        d.handle_incoming_message(im("alice", 2, "aa bbbbbb")).await.unwrap();
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html(MESSAGE_TOO_LONG)));
        assert!(bot.calls().is_empty());
        assert!(!d.contexts().get("alice").unwrap().is_busy());

        d.handle_incoming_message(im("alice", 3, "aaaaa bbbbb ccccc")).await.unwrap();
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html("reply 1")));
        assert_eq!(bot.calls()[0].0, "aaaaa bbbbb ccccc");
    }

    #[tokio::test]
    async fn markup_does_not_count_toward_size() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), limits(1000, 1, 5));

        d.handle_incoming_message(im("alice", 1, "<HTML><BODY BGCOLOR=\"#ffffff\">hello</BODY></HTML>"))
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html("reply 1")));
    }

    #[tokio::test]
    async fn bot_failure_sends_nothing_and_frees_the_slot() {
        let bot = Arc::new(RecordingBot::failing());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "hello")).await.unwrap();
        wait_idle(&d, "alice").await;
        assert_quiet(&mut rx).await;
        assert_eq!(bot.calls().len(), 1);
        assert_eq!(last_exchange(&d, "alice").await, Exchange::default());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_timeout_frees_the_slot() {
        let bot = Arc::new(RecordingBot::with_delay(Duration::from_secs(120)));
        let mut l = generous();
        l.reply_timeout = Some(Duration::from_secs(30));
        let (mut d, mut rx) = setup(Arc::clone(&bot), l);

        d.handle_incoming_message(im("alice", 1, "hello")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        wait_idle(&d, "alice").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn message_without_text_is_ignored() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        let msg = IcbmChannelMsgToClient {
            cookie: 1,
            channel_id: 1,
            sender: UserInfo::new("alice"),
            tlvs: TlvList::new(),
        };
        d.handle_incoming_message(msg).await.unwrap();
        assert_quiet(&mut rx).await;
        assert!(bot.calls().is_empty());
        assert!(!d.contexts().get("alice").unwrap().is_busy());
    }

    #[tokio::test]
    async fn warnings_escalate_and_the_third_is_returned() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 9, "hello")).await.unwrap();
        next(&mut rx).await;
        wait_idle(&d, "alice").await;

        let mut warns_back = 0;
        for n in 1..=4u32 {
            d.handle_warning(warning("alice")).await.unwrap();
            let reply = next(&mut rx).await;
            assert_eq!(reply.text(), Some(wrap_html(&format!("reply {}", n + 1))));
            if let Outbound::Message(m) = &reply {
                assert_eq!(m.cookie, 9);
            }
            if n == 3 {
                match next(&mut rx).await {
                    Outbound::Warn(w) => {
                        assert_eq!(w.screen_name, "alice");
                        warns_back += 1;
                    }
                    other => panic!("expected a warning back, got {other:?}"),
                }
            }
        }
        assert_quiet(&mut rx).await;
        assert_eq!(warns_back, 1);

        let prompts: Vec<String> = bot.calls().into_iter().skip(1).map(|(p, _)| p).collect();
        assert!(prompts[0].contains("pleasant"));
        assert!(prompts[1].contains("miffed"));
        assert!(prompts[2].contains("angry"));
        assert!(prompts[3].contains("outraged"));

        // each warning sees the exchange the previous one left behind
        assert_eq!(bot.calls()[1].1, Exchange::new("hello", "reply 1"));
        assert_eq!(bot.calls()[2].1, Exchange::new(warning_prompt(1), "reply 2"));
        assert_eq!(last_exchange(&d, "alice").await, Exchange::new(warning_prompt(4), "reply 5"));
    }

    #[tokio::test]
    async fn anonymous_or_unknown_warnings_are_ignored() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_warning(OServiceEvilNotification::default()).await.unwrap();
        d.handle_warning(warning("stranger")).await.unwrap();
        assert_quiet(&mut rx).await;
        assert!(bot.calls().is_empty());
    }

    #[tokio::test]
    async fn warning_bot_failure_is_surfaced() {
        let bot = Arc::new(RecordingBot::failing());
        let (mut d, _rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "hello")).await.unwrap();
        wait_idle(&d, "alice").await;
        d.handle_warning(warning("alice")).await.unwrap();
        let err = d.warning_finished().await.unwrap().unwrap_err();
        assert!(matches!(err, ChatError::Bot(_)));
        assert!(!d.contexts().get("alice").unwrap().is_busy());
    }

    #[tokio::test]
    async fn warning_waits_for_the_reply_in_flight() {
        let bot = Arc::new(RecordingBot::with_delay(Duration::from_millis(50)));
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "hello")).await.unwrap();
        d.handle_warning(warning("alice")).await.unwrap();

        assert_eq!(next(&mut rx).await.text(), Some(wrap_html("reply 1")));
        assert_eq!(next(&mut rx).await.text(), Some(wrap_html("reply 2")));
        assert_eq!(bot.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(bot.calls()[1].1, Exchange::new("hello", "reply 1"));
    }

    #[tokio::test]
    async fn hung_reply_and_pending_warning_do_not_block_other_users() {
        let bot = Arc::new(RecordingBot::hanging_on("slow"));
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        d.handle_incoming_message(im("alice", 1, "slow")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), d.handle_warning(warning("alice")))
            .await
            .expect("warning handler blocked the receive loop")
            .unwrap();

        d.handle_incoming_message(im("bob", 2, "hi")).await.unwrap();
        let out = next(&mut rx).await;
        assert_eq!(out.recipient(), Some("bob"));
        assert_eq!(out.text(), Some(wrap_html("reply 2")));

        // alice's warning is still parked behind her reply
        assert!(d.contexts().get("alice").unwrap().is_busy());
        assert_eq!(bot.calls().len(), 2);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn warnings_finished_reports_nothing_when_idle() {
        let bot = Arc::new(RecordingBot::default());
        let (mut d, _rx) = setup(bot, generous());
        assert!(d.warning_finished().await.is_none());
    }

    #[tokio::test]
    async fn dispatch_routes_by_classification() {
        use crate::wire::{Encode, OServiceNoop, SnacBody};
        use bytes::BytesMut;

        let bot = Arc::new(RecordingBot::default());
        let (mut d, mut rx) = setup(Arc::clone(&bot), generous());

        let mut noop = BytesMut::new();
        OServiceNoop::frame().encode(&mut noop).unwrap();
        d.dispatch(noop.freeze()).await.unwrap();
        assert!(d.contexts().is_empty());

        let mut payload = BytesMut::new();
        IcbmChannelMsgToClient::frame().encode(&mut payload).unwrap();
        im("alice", 1, "hello").encode(&mut payload).unwrap();
        d.dispatch(payload.freeze()).await.unwrap();
        assert_eq!(next(&mut rx).await.recipient(), Some("alice"));

        let truncated = Bytes::from_static(&[0x00, 0x04, 0x00, 0x07]);
        assert!(matches!(d.dispatch(truncated).await, Err(ChatError::Wire(_))));
    }
}
