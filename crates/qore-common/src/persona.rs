//! System-prompt variants. Personas are opaque selectors on the wire; the
//! table here only carries the defaults the queue needs to run.

const QORE_PROMPT: &str = "You are The Qore, a cognitive interface that helps the user think by \
maintaining a knowledge graph of their ideas. Answer directly and concretely. When the \
conversation produces a durable fact or concept, append a <memory_update> block containing a \
JSON object with `nodes` (id, label, type, tags, content) and `links` (source, target, rel, \
strength) describing the graph change. Omit the block when nothing is worth remembering.";

const EXECUTIVE_PROMPT: &str = "You are The Qore in executive mode: produce short, decision-ready \
summaries with explicit next actions. Append a <memory_update> block (JSON object with `nodes` \
and `links`) only when a durable decision was made.";

pub fn system_prompt(persona: &str) -> &'static str {
    match persona {
        "executive" => EXECUTIVE_PROMPT,
        // `qore` and anything unrecognized share the default voice.
        _ => QORE_PROMPT,
    }
}
