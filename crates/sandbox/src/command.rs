//! Line-oriented command registry.

/// Handler invoked with the whole line; returns whether it consumed it.
pub type Handler<C> = fn(&mut C, &str) -> bool;

pub struct CommandEntry<C> {
    pub trigger: &'static str,
    /// Usage, e.g. `fps[,<n>]`.
    pub formula: &'static str,
    pub description: &'static str,
    pub handler: Handler<C>,
    pub hidden: bool,
}

impl<C> Clone for CommandEntry<C> {
    fn clone(&self) -> Self {
        Self {
            trigger: self.trigger,
            formula: self.formula,
            description: self.description,
            handler: self.handler,
            hidden: self.hidden,
        }
    }
}

impl<C> std::fmt::Debug for CommandEntry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("trigger", &self.trigger)
            .field("hidden", &self.hidden)
            .finish()
    }
}

impl<C> CommandEntry<C> {
    pub fn help_line(&self) -> String {
        format!("{:<27} {}\n", self.formula, self.description)
    }
}

/// Commands in registration order. Dispatch is first-match-wins.
pub struct CommandRegistry<C> {
    entries: Vec<CommandEntry<C>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> CommandRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        trigger: &'static str,
        formula: &'static str,
        description: &'static str,
        handler: Handler<C>,
    ) -> &mut Self {
        self.entries.push(CommandEntry {
            trigger,
            formula,
            description,
            handler,
            hidden: false,
        });
        self
    }

    pub fn register_hidden(&mut self, trigger: &'static str, handler: Handler<C>) -> &mut Self {
        self.entries.push(CommandEntry {
            trigger,
            formula: trigger,
            description: "",
            handler,
            hidden: true,
        });
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = &CommandEntry<C>> {
        self.entries.iter().filter(|entry| !entry.hidden)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the first handler whose trigger prefixes `line` and accepts it.
    pub fn dispatch(&self, ctx: &mut C, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        self.entries
            .iter()
            .filter(|entry| line.starts_with(entry.trigger))
            .any(|entry| (entry.handler)(ctx, line))
    }

    /// Best completion for `partial` and the help lines of every candidate.
    ///
    /// Candidates start with `partial` or contain it as a case-insensitive
    /// subsequence beginning at their first character. The shortest trigger
    /// wins; equal lengths keep registration order.
    pub fn suggest(&self, partial: &str) -> (String, String) {
        let candidates: Vec<&CommandEntry<C>> = self
            .entries()
            .filter(|entry| matches_partial(entry.trigger, partial))
            .collect();
        let best = candidates
            .iter()
            .enumerate()
            .min_by_key(|(order, entry)| (entry.trigger.len(), *order))
            .map(|(_, entry)| entry.trigger.to_string())
            .unwrap_or_default();
        let help = candidates.iter().map(|entry| entry.help_line()).collect();
        (best, help)
    }

    pub fn find(&self, trigger: &str) -> Option<&CommandEntry<C>> {
        self.entries().find(|entry| entry.trigger == trigger)
    }
}

fn matches_partial(trigger: &str, partial: &str) -> bool {
    if partial.is_empty() || trigger.starts_with(partial) {
        return true;
    }
    let mut wanted = partial.chars().map(|ch| ch.to_ascii_lowercase());
    let mut trigger_chars = trigger.chars().map(|ch| ch.to_ascii_lowercase());
    let (Some(first), Some(head)) = (wanted.next(), trigger_chars.next()) else {
        return false;
    };
    if first != head {
        return false;
    }
    let mut pending = wanted.peekable();
    for ch in trigger_chars {
        if pending.peek() == Some(&ch) {
            pending.next();
        }
    }
    pending.peek().is_none()
}

/// Comma-separated arguments after the trigger, trimmed.
pub fn split_args(line: &str) -> Vec<&str> {
    line.split(',').skip(1).map(str::trim).collect()
}
