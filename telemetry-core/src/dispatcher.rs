//! Command dispatch by scope (C6, spec §4.6).
//!
//! A node registers one or more callbacks per command name, each scoped
//! to broadcast traffic, private (targeted-at-me) traffic, or both.
//! Handler panics are not caught here; a handler signals failure through
//! its `Result` return value instead.

use std::collections::HashMap;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    Broadcast,
    Private,
    Any,
}

pub type CommandHandler = Box<dyn Fn(&str, &[String]) -> Result<(), String> + Send + Sync>;

struct Registration {
    handler: CommandHandler,
    scope: CommandScope,
}

/// Routes incoming command frames to registered handlers by name and scope.
pub struct CommandDispatcher {
    node_id: String,
    handlers: HashMap<String, Vec<Registration>>,
}

impl CommandDispatcher {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { node_id: node_id.into(), handlers: HashMap::new() }
    }

    pub fn register(&mut self, command: &str, scope: CommandScope, handler: CommandHandler) {
        self.handlers.entry(command.to_string()).or_default().push(Registration { handler, scope });
    }

    /// Drop every handler registered for `command`. Returns `true` if any were removed.
    pub fn unregister_all(&mut self, command: &str) -> bool {
        self.handlers.remove(command).is_some()
    }

    /// Dispatch `command` with `args` to every handler whose scope matches
    /// `target_node_id` (empty means broadcast). Returns `true` if at
    /// least one handler ran.
    pub fn dispatch(&self, command: &str, args: &[String], target_node_id: &str) -> bool {
        if !target_node_id.is_empty() && target_node_id != self.node_id {
            return false;
        }
        let Some(registrations) = self.handlers.get(command) else { return false };

        let mut ran = false;
        for reg in registrations {
            let matches = match reg.scope {
                CommandScope::Any => true,
                CommandScope::Broadcast => target_node_id.is_empty(),
                CommandScope::Private => target_node_id == self.node_id,
            };
            if !matches {
                continue;
            }
            if let Err(e) = (reg.handler)(command, args) {
                warn!(command, error = %e, "command handler failed");
            }
            ran = true;
        }
        ran
    }

    pub fn registered_commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn broadcast_scope_only_fires_on_empty_target() {
        let mut d = CommandDispatcher::new("ab01");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        d.register("ping", CommandScope::Broadcast, Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(d.dispatch("ping", &[], ""));
        assert!(!d.dispatch("ping", &[], "ab01"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn private_scope_only_fires_when_targeted_at_self() {
        let mut d = CommandDispatcher::new("ab01");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        d.register("reboot", CommandScope::Private, Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(!d.dispatch("reboot", &[], ""));
        assert!(d.dispatch("reboot", &[], "ab01"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_targeted_at_other_node_is_ignored_entirely() {
        let mut d = CommandDispatcher::new("ab01");
        d.register("ping", CommandScope::Any, Box::new(|_, _| Ok(())));
        assert!(!d.dispatch("ping", &[], "ab02"));
    }

    #[test]
    fn any_scope_fires_for_broadcast_and_private() {
        let mut d = CommandDispatcher::new("ab01");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        d.register("echo", CommandScope::Any, Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        d.dispatch("echo", &[], "");
        d.dispatch("echo", &[], "ab01");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_error_does_not_propagate() {
        let mut d = CommandDispatcher::new("ab01");
        d.register("bad", CommandScope::Any, Box::new(|_, _| Err("boom".into())));
        assert!(d.dispatch("bad", &[], ""));
    }

    #[test]
    fn registered_commands_are_sorted() {
        let mut d = CommandDispatcher::new("ab01");
        d.register("zeta", CommandScope::Any, Box::new(|_, _| Ok(())));
        d.register("alpha", CommandScope::Any, Box::new(|_, _| Ok(())));
        assert_eq!(d.registered_commands(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
