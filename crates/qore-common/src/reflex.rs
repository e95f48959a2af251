//! Reflexes: fixed trigger-phrase shortcuts answered without touching the
//! AI provider. Matching is case-insensitive substring containment over the
//! inbound message, first entry wins.

pub struct ReflexTable {
    entries: Vec<(String, String)>,
}

impl ReflexTable {
    /// The product's stock reflex table.
    pub fn builtin() -> Self {
        Self::from_pairs([
            ("hello", "Hello! I'm The Qore, your cognitive interface."),
            ("hi", "Hi there! How can I help you think today?"),
            (
                "help",
                "I can help you build a knowledge graph, manage ideas, and think more clearly. \
                 Try asking me something or just start chatting!",
            ),
            (
                "what are you",
                "I'm The Qore - a neural interface that helps you think. I maintain a graph of \
                 your memories and ideas, and I learn from our conversations.",
            ),
            (
                "how do you work",
                "I store your thoughts as nodes in a graph, connected by relationships. When you \
                 talk to me, I find relevant context and update the graph based on our \
                 conversation.",
            ),
        ])
    }

    pub fn from_pairs<I, T, U>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(trigger, response)| (trigger.into().to_lowercase(), response.into()))
                .collect(),
        }
    }

    pub fn respond(&self, message: &str) -> Option<&str> {
        let lowered = message.to_lowercase();
        self.entries
            .iter()
            .find(|(trigger, _)| lowered.contains(trigger.as_str()))
            .map(|(_, response)| response.as_str())
    }
}
