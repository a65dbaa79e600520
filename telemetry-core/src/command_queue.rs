//! The gateway's serial command queue (C4, spec §4.4).
//!
//! At most one command is ever "in flight" to the node network at a
//! time: `get_next_to_send` hands back the same command until it is
//! either ACKed or exhausts its retries, with exponential-ish backoff in
//! between. A small response store lets HTTP callers block on a result
//! without threading a channel through the transceiver loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ids::new_command_id;

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command_id: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub node_id: String,
    pub packet: Vec<u8>,
    pub next_retry_time: Instant,
    pub retry_count: u32,
    pub max_retries: u32,
    pub first_sent_time: Option<Instant>,
    pub expected_acks: usize,
    pub acked_nodes: HashSet<String>,
    pub node_payloads: HashMap<String, Option<Map<String, Value>>>,
}

/// Outcome stored once a command retires, successfully or not.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// Single-ack command: the one ACK payload received, if any.
    Single(Option<Map<String, Value>>),
    /// Multi-ack command: payload per responding node.
    Multi(HashMap<String, Option<Map<String, Value>>>),
    Expired,
}

struct CompletedResponse {
    stored_at: Instant,
    outcome: CommandOutcome,
}

struct Inner {
    queue: VecDeque<PendingCommand>,
    current: Option<PendingCommand>,
    completed: HashMap<String, CompletedResponse>,
}

/// Tunables for queue sizing, retry backoff and response retention.
#[derive(Debug, Clone, Copy)]
pub struct CommandQueueConfig {
    pub max_size: usize,
    pub max_retries: u32,
    pub initial_retry_ms: u64,
    pub max_retry_ms: u64,
    pub retry_multiplier: f64,
    /// Retry count for the discovery sub-protocol (spec §4.4/§4.7); the
    /// sweep otherwise reuses this same config's initial/max/multiplier
    /// backoff settings and layers this separate retry count on top.
    pub discovery_retries: u32,
    pub response_ttl: Duration,
}

impl Default for CommandQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 128,
            max_retries: 10,
            initial_retry_ms: 500,
            max_retry_ms: 5000,
            retry_multiplier: 1.5,
            discovery_retries: 30,
            response_ttl: Duration::from_secs(60),
        }
    }
}

impl CommandQueueConfig {
    /// Warn, rather than fail, when the configured bounds can never
    /// produce a valid backoff schedule.
    pub fn validate_timeouts(&self) {
        if self.initial_retry_ms > self.max_retry_ms {
            warn!(
                initial_retry_ms = self.initial_retry_ms,
                max_retry_ms = self.max_retry_ms,
                "initial_retry_ms exceeds max_retry_ms; every retry will be clamped to max_retry_ms"
            );
        }
        if self.retry_multiplier < 1.0 {
            warn!(retry_multiplier = self.retry_multiplier, "retry_multiplier below 1.0 will not back off");
        }
    }

    /// Worst-case seconds from first send to final retry expiring.
    pub fn calculate_max_retry_time(&self) -> f64 {
        (1..self.max_retries)
            .map(|i| retry_delay_ms(i, self.initial_retry_ms, self.retry_multiplier, self.max_retry_ms))
            .sum::<u64>() as f64
            / 1000.0
    }

    /// Warn if an operator-facing wait timeout is shorter than the worst-case
    /// retry budget, since the caller would then give up before the queue does.
    pub fn validate_wait_timeout(&self, wait_timeout_secs: f64) {
        let max_retry_time = self.calculate_max_retry_time();
        if wait_timeout_secs < max_retry_time {
            warn!(
                wait_timeout_secs,
                max_retry_time, "wait timeout is shorter than the worst-case retry budget; caller may give up before the queue does"
            );
        }
    }
}

fn retry_delay_ms(retry_count: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> u64 {
    let scaled = (initial_ms as f64) * multiplier.powi(retry_count as i32 - 1);
    (scaled as u64).min(max_ms)
}

pub struct CommandQueue {
    config: Mutex<CommandQueueConfig>,
    inner: Mutex<Inner>,
    response_ready: Condvar,
}

impl CommandQueue {
    pub fn new(config: CommandQueueConfig) -> Self {
        config.validate_timeouts();
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(Inner { queue: VecDeque::new(), current: None, completed: HashMap::new() }),
            response_ready: Condvar::new(),
        }
    }

    pub fn config(&self) -> CommandQueueConfig {
        *self.config.lock().unwrap()
    }

    pub fn set_config(&self, config: CommandQueueConfig) {
        config.validate_timeouts();
        *self.config.lock().unwrap() = config;
    }

    /// Queue a command packet. Returns `None` if the queue is at `max_size`.
    pub fn add(
        &self,
        cmd: &str,
        args: &[String],
        node_id: &str,
        packet: Vec<u8>,
        expected_acks: usize,
        max_retries: Option<u32>,
    ) -> Option<String> {
        let cfg = self.config();
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= cfg.max_size {
            warn!(cmd, node_id, "command queue full, dropping enqueue");
            return None;
        }
        let command_id = new_command_id();
        debug!(target: "cmd", command_id, cmd, node_id, "CMD_QUEUED");
        inner.queue.push_back(PendingCommand {
            command_id: command_id.clone(),
            cmd: cmd.to_string(),
            args: args.to_vec(),
            node_id: node_id.to_string(),
            packet,
            next_retry_time: Instant::now(),
            retry_count: 0,
            max_retries: max_retries.unwrap_or(cfg.max_retries),
            first_sent_time: None,
            expected_acks: expected_acks.max(1),
            acked_nodes: HashSet::new(),
            node_payloads: HashMap::new(),
        });
        Some(command_id)
    }

    /// The command that should be (re)sent right now, if any.
    pub fn get_next_to_send(&self) -> Option<PendingCommand> {
        let mut inner = self.inner.lock().unwrap();
        if inner.current.is_none() {
            inner.current = inner.queue.pop_front();
        }
        match &inner.current {
            Some(cmd) if cmd.next_retry_time <= Instant::now() => Some(cmd.clone()),
            _ => None,
        }
    }

    /// Record that the current command was just transmitted, scheduling its next retry.
    pub fn mark_sent(&self) {
        let cfg = self.config();
        let mut inner = self.inner.lock().unwrap();
        if let Some(cmd) = &mut inner.current {
            cmd.retry_count += 1;
            if cmd.retry_count == 1 {
                cmd.first_sent_time = Some(Instant::now());
            }
            let delay = retry_delay_ms(cmd.retry_count, cfg.initial_retry_ms, cfg.retry_multiplier, cfg.max_retry_ms);
            cmd.next_retry_time = Instant::now() + Duration::from_millis(delay);
            debug!(target: "cmd", command_id = %cmd.command_id, retry_count = cmd.retry_count, "CMD_RETRY");
        }
    }

    /// Apply an ACK from `node_id` (empty for legacy single-ack-no-sender
    /// replies). Returns `true` if the command retired as a result.
    pub fn ack_received(&self, command_id: &str, node_id: &str, payload: Option<Map<String, Value>>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(current) = &mut inner.current else { return false };
        if current.command_id != command_id {
            debug!(target: "cmd", command_id, "stale ACK for unknown or already-retired command");
            return false;
        }

        let retiring = if node_id.is_empty() && current.expected_acks == 1 {
            true
        } else {
            let is_new = current.acked_nodes.insert(node_id.to_string());
            if !is_new {
                debug!(target: "cmd", command_id, node_id, "duplicate ACK from already-counted node, ignored");
                return false;
            }
            current.node_payloads.insert(node_id.to_string(), payload.clone());
            current.acked_nodes.len() >= current.expected_acks
        };

        if !retiring {
            return false;
        }

        let rtt = current.first_sent_time.map(|t| t.elapsed());
        let outcome = if current.expected_acks == 1 {
            CommandOutcome::Single(payload)
        } else {
            CommandOutcome::Multi(current.node_payloads.clone())
        };
        debug!(target: "cmd", command_id, rtt_ms = rtt.map(|d| d.as_millis()), "CMD_ACKED");
        inner.completed.insert(command_id.to_string(), CompletedResponse { stored_at: Instant::now(), outcome });
        inner.current = None;
        drop(inner);
        self.response_ready.notify_all();
        true
    }

    /// Retire the current command as expired if it has exhausted its
    /// retries without a response. Returns `true` if it did.
    pub fn check_expired(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let expired = matches!(&inner.current, Some(c) if c.retry_count >= c.max_retries);
        if expired {
            let cmd = inner.current.take().unwrap();
            warn!(target: "cmd", command_id = %cmd.command_id, cmd = %cmd.cmd, "CMD_EXPIRED");
            inner.completed.insert(cmd.command_id, CompletedResponse { stored_at: Instant::now(), outcome: CommandOutcome::Expired });
            drop(inner);
            self.response_ready.notify_all();
        }
        expired
    }

    /// Remove a command from the queue or cancel it if it's current.
    pub fn cancel(&self, command_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if matches!(&inner.current, Some(c) if c.command_id == command_id) {
            inner.current = None;
            return true;
        }
        let before = inner.queue.len();
        inner.queue.retain(|c| c.command_id != command_id);
        inner.queue.len() != before
    }

    /// Partial ACKs received so far for a still-in-flight multi-ack command.
    pub fn partial_acks(&self, command_id: &str) -> Option<HashMap<String, Option<Map<String, Value>>>> {
        let inner = self.inner.lock().unwrap();
        match &inner.current {
            Some(c) if c.command_id == command_id => Some(c.node_payloads.clone()),
            _ => None,
        }
    }

    /// Block the calling thread until `command_id` retires or `timeout` elapses.
    pub fn wait_for_response(&self, command_id: &str, timeout: Duration) -> Option<CommandOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(resp) = inner.completed.get(command_id) {
                return Some(clone_outcome(&resp.outcome));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .response_ready
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    pub fn cleanup_old_responses(&self) {
        let ttl = self.config().response_ttl;
        let mut inner = self.inner.lock().unwrap();
        inner.completed.retain(|_, resp| resp.stored_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queue.len() + inner.current.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clone_outcome(outcome: &CommandOutcome) -> CommandOutcome {
    match outcome {
        CommandOutcome::Single(p) => CommandOutcome::Single(p.clone()),
        CommandOutcome::Multi(m) => CommandOutcome::Multi(m.clone()),
        CommandOutcome::Expired => CommandOutcome::Expired,
    }
}

/// A node-discovery sweep in progress (spec §4.4 discovery sub-protocol).
/// `wait` blocks the caller until the sweep completes.
pub struct DiscoveryRequest {
    pub retries: u32,
    pub initial_retry_ms: u64,
    pub max_retry_ms: u64,
    pub retry_multiplier: f64,
    state: Mutex<DiscoveryState>,
    done: Condvar,
}

#[derive(Default)]
struct DiscoveryState {
    finished: bool,
    nodes: Vec<String>,
    error: Option<String>,
}

impl DiscoveryRequest {
    pub fn new(retries: u32, initial_retry_ms: u64, max_retry_ms: u64, retry_multiplier: f64) -> Self {
        Self {
            retries,
            initial_retry_ms,
            max_retry_ms,
            retry_multiplier,
            state: Mutex::new(DiscoveryState::default()),
            done: Condvar::new(),
        }
    }

    pub fn finish(&self, mut nodes: Vec<String>, error: Option<String>) {
        nodes.sort();
        let mut state = self.state.lock().unwrap();
        state.nodes = nodes;
        state.error = error;
        state.finished = true;
        self.done.notify_all();
    }

    pub fn wait(&self, timeout: Duration) -> Option<(Vec<String>, Option<String>)> {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while !state.finished {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.done.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
        Some((state.nodes.clone(), state.error.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> CommandQueue {
        CommandQueue::new(CommandQueueConfig {
            initial_retry_ms: 10,
            max_retry_ms: 40,
            retry_multiplier: 2.0,
            max_retries: 3,
            ..Default::default()
        })
    }

    #[test]
    fn add_then_get_next_returns_it_immediately() {
        let q = queue();
        let id = q.add("ping", &[], "ab01", vec![1, 2, 3], 1, None).unwrap();
        let next = q.get_next_to_send().unwrap();
        assert_eq!(next.command_id, id);
    }

    #[test]
    fn queue_rejects_past_max_size() {
        let q = CommandQueue::new(CommandQueueConfig { max_size: 1, ..Default::default() });
        assert!(q.add("a", &[], "n", vec![], 1, None).is_some());
        assert!(q.add("b", &[], "n", vec![], 1, None).is_none());
    }

    #[test]
    fn single_ack_retires_immediately() {
        let q = queue();
        let id = q.add("ping", &[], "ab01", vec![], 1, None).unwrap();
        q.get_next_to_send();
        q.mark_sent();
        assert!(q.ack_received(&id, "ab01", None));
        assert!(q.wait_for_response(&id, Duration::from_millis(50)).is_some());
    }

    #[test]
    fn multi_ack_waits_for_all_expected_nodes() {
        let q = queue();
        let id = q.add("discover", &[], "", vec![], 2, None).unwrap();
        q.get_next_to_send();
        q.mark_sent();
        assert!(!q.ack_received(&id, "ab01", None));
        assert!(q.ack_received(&id, "ab02", None));
    }

    #[test]
    fn duplicate_ack_does_not_overwrite_stored_payload_or_advance_count() {
        let q = queue();
        let id = q.add("echo", &["42".to_string()], "", vec![], 3, None).unwrap();
        q.get_next_to_send();
        q.mark_sent();

        let mut first = Map::new();
        first.insert("r".to_string(), Value::String("42".into()));
        assert!(!q.ack_received(&id, "n1", Some(first.clone())));

        let mut dup = Map::new();
        dup.insert("r".to_string(), Value::String("tampered".into()));
        assert!(!q.ack_received(&id, "n1", Some(dup)));

        assert!(!q.ack_received(&id, "n2", Some(first.clone())));
        assert!(q.ack_received(&id, "n3", Some(first.clone())));

        match q.wait_for_response(&id, Duration::from_millis(50)) {
            Some(CommandOutcome::Multi(responses)) => {
                assert_eq!(responses.len(), 3);
                assert_eq!(responses["n1"], Some(first));
            }
            other => panic!("expected Multi outcome, got {other:?}"),
        }
    }

    #[test]
    fn expires_after_max_retries() {
        let q = queue();
        let id = q.add("ping", &[], "ab01", vec![], 1, None).unwrap();
        for _ in 0..3 {
            q.get_next_to_send();
            q.mark_sent();
        }
        assert!(q.check_expired());
        match q.wait_for_response(&id, Duration::from_millis(50)) {
            Some(CommandOutcome::Expired) => {}
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn cancel_removes_queued_command() {
        let q = queue();
        let a = q.add("a", &[], "n1", vec![], 1, None).unwrap();
        let _b = q.add("b", &[], "n2", vec![], 1, None).unwrap();
        assert!(q.cancel(&a));
        let next = q.get_next_to_send().unwrap();
        assert_ne!(next.command_id, a);
    }

    #[test]
    fn retry_delay_is_exponential_up_to_cap() {
        assert_eq!(retry_delay_ms(1, 100, 2.0, 1000), 100);
        assert_eq!(retry_delay_ms(2, 100, 2.0, 1000), 200);
        assert_eq!(retry_delay_ms(10, 100, 2.0, 1000), 1000);
    }

    #[test]
    fn discovery_request_wait_returns_after_finish() {
        use std::sync::Arc;
        let req = Arc::new(DiscoveryRequest::new(5, 100, 1000, 1.5));
        let req2 = req.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            req2.finish(vec!["ab02".into(), "ab01".into()], None);
        });
        let (nodes, err) = req.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(nodes, vec!["ab01".to_string(), "ab02".to_string()]);
        assert!(err.is_none());
    }
}
