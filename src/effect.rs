//! Channel effect assembly.
//!
//! Wires the stages together:
//!
//! ```text
//! transport -> output mapper -> event source -> debounce
//!           -> state-correlated action mapper -> fault translator -> ActionStream
//! ```
//!
//! The event source runs on transport threads and feeds a dedicated worker
//! thread through an unbounded queue. The worker owns the debouncer, the
//! action mapper and the fault translator, so mapping is sequential per
//! effect instance.
//!
//! The queue never blocks a transport thread. It only grows while the worker
//! is busy mapping; with a non-zero window the worker then drains everything
//! queued into the single-slot debouncer before it maps again, so a burst
//! behind a slow mapper costs one mapping call.
//!
//! # Example
//!
//! ```ignore
//! let effect = ChannelEffect::new(
//!     "chats",
//!     move || Some(transport.channel(ChannelDescriptor::new("ChatChannel"))),
//!     JsonDataMapper::<NewChat>::with_type("new_chat"),
//!     FnActionMapper::new(|chat: NewChat, state: &AppState| state.actions_for(chat)),
//!     app_state.clone(),
//! );
//!
//! for item in effect.run()? {
//!     match item {
//!         FlowAction::Action { action, .. } => dispatch(action),
//!         FlowAction::Failed(error) => { report(error); break }
//!     }
//! }
//! ```

use crate::action::StateCorrelatedMapper;
use crate::config::EffectConfig;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::fault::{FaultTranslator, FlowAction};
use crate::mapper::{ActionMapper, OutputMapper};
use crate::source::{CancelHandle, ChannelEventSource};
use crate::state::StateAccess;
use crate::transport::Channel;
use crate::types::{FlowId, RawMessage};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What the event source hands to the worker.
enum SourceEvent<T> {
    Value(T),
    End(Result<()>),
}

/// A configured, not yet running channel effect.
pub struct ChannelEffect<C, M, AM, S>
where
    M: OutputMapper,
{
    flow_id: FlowId,
    source: ChannelEventSource<C, M>,
    action_mapper: AM,
    state: S,
    config: EffectConfig,
}

impl<C, M, AM, S> ChannelEffect<C, M, AM, S>
where
    C: Channel,
    M: OutputMapper<Input = RawMessage>,
    M::Output: Send + 'static,
    AM: ActionMapper<Output = M::Output>,
    AM::Action: Send + 'static,
    S: StateAccess<State = AM::State>,
{
    pub fn new<F>(
        flow_id: impl Into<FlowId>,
        factory: F,
        output_mapper: M,
        action_mapper: AM,
        state: S,
    ) -> Self
    where
        F: Fn() -> Option<Arc<C>> + Send + Sync + 'static,
    {
        Self {
            flow_id: flow_id.into(),
            source: ChannelEventSource::new(factory, output_mapper),
            action_mapper,
            state,
            config: EffectConfig::default(),
        }
    }

    pub fn config(mut self, config: EffectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.config.debounce = window;
        self
    }

    /// Start the worker and signal demand on the event source.
    ///
    /// The channel factory runs on the calling thread before this returns.
    pub fn run(self) -> Result<ActionStream<AM::Action>> {
        let (event_tx, event_rx) = unbounded();
        let (action_tx, action_rx) = unbounded();
        let cancel = self.source.cancel_handle();

        let worker = Worker {
            events: event_rx,
            actions: action_tx,
            debouncer: Debouncer::new(self.config.debounce),
            mapper: StateCorrelatedMapper::new(self.action_mapper, self.state),
            translator: FaultTranslator::new(self.flow_id.clone()),
            cancel: cancel.clone(),
        };

        thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || worker.run())?;

        debug!(flow = %self.flow_id, debounce = ?self.config.debounce, "starting channel effect");

        let value_tx: Sender<SourceEvent<M::Output>> = event_tx.clone();
        self.source.start(
            move |output| {
                let _ = value_tx.send(SourceEvent::Value(output));
            },
            move |result| {
                let _ = event_tx.send(SourceEvent::End(result));
            },
        );

        Ok(ActionStream {
            receiver: action_rx,
            cancel,
            flow_id: self.flow_id,
        })
    }
}

struct Worker<AM, S>
where
    AM: ActionMapper,
{
    events: Receiver<SourceEvent<AM::Output>>,
    actions: Sender<FlowAction<AM::Action>>,
    debouncer: Debouncer<AM::Output>,
    mapper: StateCorrelatedMapper<AM, S>,
    translator: FaultTranslator,
    cancel: CancelHandle,
}

impl<AM, S> Worker<AM, S>
where
    AM: ActionMapper,
    S: StateAccess<State = AM::State>,
{
    fn run(mut self) {
        loop {
            let event = match self.debouncer.deadline() {
                Some(deadline) => match self.events.recv_deadline(deadline) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            if self.cancel.is_cancelled() {
                break;
            }

            let keep_going = match event {
                None => match self.debouncer.poll(Instant::now()) {
                    Some(output) => self.dispatch(output),
                    None => true,
                },
                Some(event) => self.handle(event) && self.absorb_backlog(),
            };

            if !keep_going {
                break;
            }
        }

        debug!(flow = %self.translator.flow_id(), mapped = self.mapper.mapped(), "channel effect worker stopped");
        // Releases the channel once the source has ended on its own.
        self.cancel.cancel();
    }

    /// Returns false once the worker should stop.
    fn handle(&mut self, event: SourceEvent<AM::Output>) -> bool {
        match event {
            SourceEvent::Value(output) => match self.debouncer.push(output, Instant::now()) {
                Some(output) => self.dispatch(output),
                None => true,
            },
            SourceEvent::End(Ok(())) => {
                if let Some(output) = self.debouncer.flush() {
                    self.dispatch(output);
                }
                false
            }
            SourceEvent::End(Err(err)) => {
                self.debouncer.clear();
                if let Some(error) = self.translator.translate(&err) {
                    debug!(flow = %error.flow_id, error = %error.error_description, "effect failed");
                    let _ = self.actions.send(FlowAction::Failed(error));
                }
                false
            }
        }
    }

    /// Fold whatever queued up meanwhile into the debouncer.
    fn absorb_backlog(&mut self) -> bool {
        if self.debouncer.window().is_zero() {
            return true;
        }
        let mut absorbed = 0usize;
        while let Ok(event) = self.events.try_recv() {
            if self.cancel.is_cancelled() {
                return false;
            }
            absorbed += 1;
            if !self.handle(event) {
                return false;
            }
        }
        if absorbed > 0 {
            trace!(absorbed, "collapsed queued outputs");
        }
        true
    }

    /// Map and forward one output. Returns false once nobody is listening.
    fn dispatch(&mut self, output: AM::Output) -> bool {
        for action in self.mapper.map_action(output) {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.actions.send(self.translator.tag(action)).is_err() {
                return false;
            }
        }
        true
    }
}

/// Receiving end of a running channel effect. Dropping it cancels the effect.
pub struct ActionStream<A> {
    receiver: Receiver<FlowAction<A>>,
    cancel: CancelHandle,
    flow_id: FlowId,
}

impl<A> ActionStream<A> {
    /// Receive the next action (blocking). Errors once the stream has ended.
    pub fn recv(&self) -> std::result::Result<FlowAction<A>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an action (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<FlowAction<A>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<FlowAction<A>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle for cancelling from elsewhere, e.g. an [`EffectRegistry`](crate::EffectRegistry).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl<A> Iterator for ActionStream<A> {
    type Item = FlowAction<A>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

impl<A> Drop for ActionStream<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{DataMapper, FnActionMapper};
    use crate::state::SharedState;
    use crate::transport::{MemoryChannel, MemoryTransport};
    use crate::types::ChannelDescriptor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_millis(500);

    fn id_of(payload: &serde_json::Value) -> Option<u64> {
        payload.get("id")?.as_u64()
    }

    fn run_effect(
        channel: Option<Arc<MemoryChannel>>,
        state: SharedState<u64>,
        debounce: Duration,
    ) -> ActionStream<(u64, u64)> {
        ChannelEffect::new(
            "test-flow",
            move || channel.clone(),
            DataMapper::new(id_of),
            FnActionMapper::new(|id: u64, offset: &u64| vec![(id, *offset)]),
            state,
        )
        .debounce(debounce)
        .run()
        .unwrap()
    }

    #[test]
    fn test_actions_carry_flow_id_and_state() {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let state = SharedState::new(10);
        let stream = run_effect(Some(channel), state.clone(), Duration::ZERO);

        transport.publish("ChatChannel", RawMessage::data(json!({"id": 1})));
        let first = stream.recv_timeout(WAIT).unwrap();
        assert_eq!(first.flow_id().as_str(), "test-flow");
        assert_eq!(first.into_action(), Some((1, 10)));

        state.replace(20);
        transport.publish("ChatChannel", RawMessage::data(json!({"id": 2})));
        assert_eq!(stream.recv_timeout(WAIT).unwrap().into_action(), Some((2, 20)));
    }

    #[test]
    fn test_no_channel_completes_silently() {
        let stream = run_effect(None, SharedState::new(0), Duration::ZERO);
        let items: Vec<_> = stream.collect();
        assert!(items.is_empty());
    }

    #[test]
    fn test_failure_is_terminal() {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let mut stream = run_effect(Some(channel.clone()), SharedState::new(0), Duration::ZERO);

        channel.fail("socket closed");

        match stream.next() {
            Some(FlowAction::Failed(error)) => {
                assert_eq!(error.flow_id.as_str(), "test-flow");
                assert!(error.error_description.contains("socket closed"));
            }
            other => panic!("Expected terminal failure, got {:?}", other),
        }
        assert!(stream.next().is_none());
        // The worker releases the failed channel on its way out.
        assert_eq!(channel.unsubscribe_calls(), 1);
    }

    #[test]
    fn test_backlog_behind_slow_mapper_collapses() {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = ChannelEffect::new(
            "slow-flow",
            move || Some(channel.clone()),
            DataMapper::new(id_of),
            FnActionMapper::new(move |id: u64, _: &u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                if id == 0 {
                    thread::sleep(Duration::from_millis(200));
                }
                vec![id]
            }),
            SharedState::new(0u64),
        )
        .debounce(Duration::from_millis(20))
        .run()
        .unwrap();

        transport.publish("ChatChannel", RawMessage::data(json!({"id": 0})));
        // Let the first output reach the mapper, then pile up a burst behind it
        thread::sleep(Duration::from_millis(100));
        for id in 1..=50u64 {
            transport.publish("ChatChannel", RawMessage::data(json!({"id": id})));
        }

        assert_eq!(stream.recv_timeout(WAIT).unwrap().into_action(), Some(0));
        assert_eq!(stream.recv_timeout(WAIT).unwrap().into_action(), Some(50));
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_cancels() {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let stream = run_effect(Some(channel.clone()), SharedState::new(0), Duration::ZERO);

        drop(stream);

        assert_eq!(channel.unsubscribe_calls(), 1);
        assert!(!channel.is_subscribed());
    }
}
