//! In-process reference kernel.
//!
//! Sentences are opaque: checking one only asks the configured checker, and
//! goals are derived from `Proof.`/`Qed.` bracketing. The document graph,
//! feedback routing, interrupt polling and load-path scanning behave like the
//! real kernel's, which makes this the kernel used by the test suite and the
//! `--kernel loopback` mode of the binary.

use std::collections::BTreeSet;

use coqpod_core::document::DocumentTree;
use coqpod_core::protocol::{
    Answer, Command, FeedbackMsg, Level, RouteId, SearchQuery, Span, StateId,
};
use serde_json::json;

use super::{BootContext, Kernel, KernelError};
use crate::interrupt::InterruptChannel;
use crate::vfs::Vfs;

type Checker = Box<dyn Fn(&str) -> Result<(), String> + Send>;

const CLOSERS: [&str; 4] = ["Qed.", "Defined.", "Admitted.", "Abort."];
const DECLARATIONS: [&str; 6] = [
    "Lemma",
    "Theorem",
    "Definition",
    "Fixpoint",
    "Inductive",
    "Example",
];

pub struct LoopbackKernel {
    doc: DocumentTree,
    executed: BTreeSet<StateId>,
    checker: Checker,
    poll_cost: usize,
    modules: Vec<String>,
    vfs: Option<Vfs>,
}

impl Default for LoopbackKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackKernel {
    pub fn new() -> Self {
        Self {
            doc: DocumentTree::new(),
            executed: BTreeSet::new(),
            checker: Box::new(|_| Ok(())),
            poll_cost: 1,
            modules: Vec::new(),
            vfs: None,
        }
    }

    /// Decide which sentences fail when executed.
    pub fn with_checker(
        mut self,
        checker: impl Fn(&str) -> Result<(), String> + Send + 'static,
    ) -> Self {
        self.checker = Box::new(checker);
        self
    }

    /// Number of interrupt polls spent on each sentence.
    pub fn with_poll_cost(mut self, poll_cost: usize) -> Self {
        self.poll_cost = poll_cost;
        self
    }

    fn handle(&mut self, command: Command, interrupt: &InterruptChannel) -> Vec<Answer> {
        match command {
            Command::Init => {
                let root = self.doc.init();
                self.executed = BTreeSet::from([root]);
                vec![Answer::Ready(root)]
            }
            Command::Add {
                edit_at,
                parent,
                text,
                verbose,
            } => match self.doc.add(edit_at, parent, &text) {
                Ok(id) => {
                    self.prune_executed();
                    let mut answers = vec![Answer::Added(id, Some(Span::of_text(&text)))];
                    if verbose {
                        answers.push(feedback(id, RouteId::DEFAULT, Level::Debug, json!(["Added"])));
                    }
                    answers
                }
                Err(e) => vec![error(e)],
            },
            Command::Exec(id) => self.exec(id, interrupt),
            Command::Cancel(id) => match self.doc.cancel(id) {
                Ok(tip) => {
                    self.prune_executed();
                    vec![Answer::BackTo(tip)]
                }
                Err(e) => vec![error(e)],
            },
            Command::Goals(id) => {
                if !self.executed.contains(&id) || !self.doc.is_live(id) {
                    return vec![error(format!("state {id} has not been executed"))];
                }
                vec![Answer::goal_info(id, self.goals(id))]
            }
            Command::Query { id, route, text } => {
                if !self.doc.is_live(id) {
                    return vec![error(format!("state {id} is not live"))];
                }
                vec![feedback(id, route, Level::Notice, json!({ "query": text }))]
            }
            Command::Inspect { id, route, query } => {
                if !self.doc.is_live(id) {
                    return vec![error(format!("state {id} is not live"))];
                }
                self.inspect(id, &query)
                    .into_iter()
                    .map(|name| feedback(id, route, Level::Info, json!({ "name": name })))
                    .collect()
            }
            Command::RefreshLoadPath => {
                self.modules = self.scan_modules();
                tracing::debug!("Load path refreshed: {} modules", self.modules.len());
                Vec::new()
            }
        }
    }

    fn exec(&mut self, id: StateId, interrupt: &InterruptChannel) -> Vec<Answer> {
        let path = match self.doc.path(id) {
            Ok(path) => path,
            Err(e) => return vec![error(e)],
        };

        let mut answers = Vec::new();
        for pair in path.windows(2) {
            let (good, sid) = (pair[0], pair[1]);
            if self.executed.contains(&sid) {
                continue;
            }
            let text = self.doc.text_of(sid).unwrap_or_default().to_string();

            if self.spin(interrupt) {
                answers.push(self.fail(good, sid, None, "User interrupt."));
                return answers;
            }
            if let Err(msg) = (self.checker)(&text) {
                answers.push(self.fail(good, sid, Some(Span::of_text(&text)), &msg));
                return answers;
            }

            self.executed.insert(sid);
            answers.push(feedback(sid, RouteId::DEFAULT, Level::Info, json!(["Processed"])));
        }
        answers
    }

    /// Burn the sentence's poll budget. Returns whether an interrupt was seen.
    fn spin(&self, interrupt: &InterruptChannel) -> bool {
        for _ in 0..self.poll_cost {
            if interrupt.take() {
                return true;
            }
            std::thread::yield_now();
        }
        false
    }

    fn fail(&mut self, good: StateId, bad: StateId, loc: Option<Span>, msg: &str) -> Answer {
        if let Err(e) = self.doc.rollback(good, bad) {
            tracing::warn!("Rollback to {} failed: {}", good, e);
        }
        self.prune_executed();
        Answer::CoqExn {
            loc,
            rollback: Some((good, bad)),
            msg: msg.to_string(),
        }
    }

    fn prune_executed(&mut self) {
        let doc = &self.doc;
        self.executed.retain(|sid| doc.is_live(*sid));
    }

    fn goals(&self, id: StateId) -> Option<serde_json::Value> {
        let path = self.doc.path(id).ok()?;
        let mut statement: Option<&str> = None;
        let mut open = false;
        for sid in path {
            let text = self.doc.text_of(sid).unwrap_or_default().trim();
            if DECLARATIONS.iter().any(|d| text.starts_with(d)) {
                statement = Some(text);
            } else if text.starts_with("Proof") {
                open = statement.is_some();
            } else if CLOSERS.iter().any(|c| text.starts_with(c)) {
                open = false;
                statement = None;
            }
        }
        if !open {
            return None;
        }
        Some(json!({
            "goals": [{ "ty": statement, "hyp": [] }],
            "stack": [],
            "shelf": [],
            "given_up": [],
        }))
    }

    fn inspect(&self, id: StateId, query: &SearchQuery) -> Vec<String> {
        match query {
            SearchQuery::All => self
                .modules
                .iter()
                .cloned()
                .chain(self.local_names(id))
                .collect(),
            SearchQuery::CurrentFile | SearchQuery::Locals => self.local_names(id),
            SearchQuery::ModulePrefix(prefix) => {
                let prefix = prefix.join(".");
                self.modules
                    .iter()
                    .filter(|m| *m == &prefix || m.starts_with(&format!("{prefix}.")))
                    .cloned()
                    .collect()
            }
            SearchQuery::Keyword(word) => self
                .modules
                .iter()
                .cloned()
                .chain(self.local_names(id))
                .filter(|name| name.contains(word.as_str()))
                .collect(),
        }
    }

    /// Names declared by executed sentences up to `id`.
    fn local_names(&self, id: StateId) -> Vec<String> {
        let Ok(path) = self.doc.path(id) else {
            return Vec::new();
        };
        path.into_iter()
            .filter(|sid| self.executed.contains(sid))
            .filter_map(|sid| {
                let mut words = self.doc.text_of(sid)?.split_whitespace();
                let keyword = words.next()?;
                if !DECLARATIONS.contains(&keyword) {
                    return None;
                }
                let name = words.next()?;
                Some(name.trim_end_matches([':', '.']).to_string())
            })
            .collect()
    }

    fn scan_modules(&self) -> Vec<String> {
        let Some(vfs) = &self.vfs else {
            return Vec::new();
        };
        let lib_root = vfs.lib_root();
        let files = match vfs.list(lib_root) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", lib_root, e);
                return Vec::new();
            }
        };
        files
            .iter()
            .filter_map(|path| path.strip_suffix(".vo"))
            .filter_map(|path| path.strip_prefix(lib_root))
            .map(|path| path.trim_start_matches('/').replace('/', "."))
            .collect()
    }
}

fn feedback(id: StateId, route: RouteId, level: Level, contents: serde_json::Value) -> Answer {
    Answer::Feedback(FeedbackMsg {
        span_id: id,
        route,
        level,
        contents,
    })
}

fn error(e: impl ToString) -> Answer {
    Answer::CoqExn {
        loc: None,
        rollback: None,
        msg: e.to_string(),
    }
}

impl Kernel for LoopbackKernel {
    fn boot(&mut self, ctx: &BootContext) -> Result<(), KernelError> {
        if !ctx.vfs.exists(&ctx.image) {
            return Err(KernelError::MissingImage(ctx.image.clone()));
        }
        for stub in &ctx.stubs {
            if !ctx.vfs.exists(stub) {
                return Err(KernelError::MissingImage(stub.clone()));
            }
        }
        self.vfs = Some(ctx.vfs.clone());
        Ok(())
    }

    fn post(
        &mut self,
        command: &str,
        interrupt: &InterruptChannel,
        emit: &mut dyn FnMut(String),
    ) -> Result<(), KernelError> {
        if self.vfs.is_none() {
            return Err(KernelError::NotBooted);
        }
        let answers = match Command::decode(command) {
            Ok(command) => self.handle(command, interrupt),
            Err(e) => vec![error(format!("malformed command: {e}"))],
        };
        for answer in answers {
            emit(answer.encode());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goals_follow_proof_bracketing() {
        let mut kernel = LoopbackKernel::new();
        let interrupt = InterruptChannel::new();
        kernel.handle(Command::Init, &interrupt);
        let mut last = StateId(0);
        for text in ["Lemma t : True.", "Proof.", "exact I."] {
            if let Answer::Added(id, _) = kernel.handle(Command::add(text), &interrupt)[0] {
                last = id;
            }
        }
        kernel.handle(Command::Exec(last), &interrupt);
        let goals = kernel.goals(last).expect("proof should be open");
        assert_eq!(goals["goals"][0]["ty"], "Lemma t : True.");
    }

    #[test]
    fn local_names_come_from_executed_declarations() {
        let mut kernel = LoopbackKernel::new();
        let interrupt = InterruptChannel::new();
        kernel.handle(Command::Init, &interrupt);
        kernel.handle(Command::add("Definition one := 1."), &interrupt);
        let answers = kernel.handle(Command::add("Lemma two : one = 1."), &interrupt);
        let Answer::Added(id, _) = answers[0] else {
            panic!("expected Added");
        };
        assert!(kernel.local_names(id).is_empty());
        kernel.handle(Command::Exec(id), &interrupt);
        assert_eq!(kernel.local_names(id), vec!["one", "two"]);
    }
}
