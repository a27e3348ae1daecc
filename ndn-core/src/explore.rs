//! Exploration frontier: crawl a name tree one level at a time.
//!
//! Each task owns a prefix and the components already seen below it. A response reveals the
//! next component; it is excluded and the task's interest is re-expressed, while the one-level
//! deeper prefix becomes a new task. Tasks wait in a queue until the active limit allows them
//! to be expressed. The frontier only computes interests; the host expresses them.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::content::{ContentError, ContentObject, Verification};
use crate::exclude::ExclusionFilter;
use crate::interest::Interest;
use crate::name::{Component, Name};

pub type TaskId = u64;

struct Task {
    prefix: Name,
    seen: BTreeSet<Component>,
}

impl Task {
    fn exclusion(&self) -> ExclusionFilter {
        let mut exclude = ExclusionFilter::new();
        for component in &self.seen {
            exclude.add_component(component.clone());
        }
        exclude
    }
}

/// One discovered name: the prefix plus the revealed component (or the full name on an
/// exact match), with the verification outcome of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub name: Name,
    pub verification: Verification,
}

/// What the host must do after a response.
#[derive(Debug)]
pub struct Step {
    pub discovery: Discovery,
    /// Interest to express again for the same task.
    pub reexpress: (TaskId, Interest),
}

pub struct Frontier {
    template: Interest,
    tasks: HashMap<TaskId, Task>,
    queued: VecDeque<TaskId>,
    active: HashSet<TaskId>,
    known: HashSet<Name>,
    next_id: TaskId,
    max_active: usize,
}

impl Frontier {
    /// Frontier rooted at `root`. `max_active` 0 means no limit.
    pub fn new(root: Name, template: Interest, max_active: usize) -> Self {
        let mut frontier = Self {
            template,
            tasks: HashMap::new(),
            queued: VecDeque::new(),
            active: HashSet::new(),
            known: HashSet::new(),
            next_id: 0,
            max_active,
        };
        frontier.spawn(root);
        frontier
    }

    fn spawn(&mut self, prefix: Name) -> Option<TaskId> {
        if !self.known.insert(prefix.clone()) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(
            id,
            Task {
                prefix,
                seen: BTreeSet::new(),
            },
        );
        self.queued.push_back(id);
        Some(id)
    }

    fn interest_for(&self, task: &Task) -> Interest {
        let mut interest = Interest::from_template(&self.template, task.prefix.clone());
        if !task.seen.is_empty() {
            interest.exclude = Some(task.exclusion());
        }
        interest
    }

    /// Activate queued tasks up to the limit and return their first interests.
    pub fn poll_ready(&mut self) -> Vec<(TaskId, Interest)> {
        let mut out = Vec::new();
        while self.max_active == 0 || self.active.len() < self.max_active {
            let Some(id) = self.queued.pop_front() else {
                break;
            };
            if let Some(task) = self.tasks.get(&id) {
                out.push((id, self.interest_for(task)));
                self.active.insert(id);
            }
        }
        out
    }

    /// Handle a content response for task `id`.
    pub fn on_content(
        &mut self,
        id: TaskId,
        verification: Verification,
        co: &ContentObject,
        matched_comps: usize,
    ) -> Result<Step, ExploreError> {
        let name = co.name().ok_or(ExploreError::MissingName)?;
        let task = self.tasks.get_mut(&id).ok_or(ExploreError::UnknownTask(id))?;
        if matched_comps > name.len() || name.prefix(matched_comps) != task.prefix {
            return Err(ExploreError::PrefixMismatch {
                expected: task.prefix.clone(),
                got: name.clone(),
            });
        }
        let (component, shown) = match name.get(matched_comps) {
            Some(c) => (c.clone(), name.prefix(matched_comps + 1)),
            None => (co.implicit_digest_component()?, name.clone()),
        };
        task.seen.insert(component);
        let reexpress = (id, self.interest_for(&self.tasks[&id]));
        if matched_comps + 1 < name.len() {
            self.spawn(name.prefix(matched_comps + 1));
        }
        Ok(Step {
            discovery: Discovery {
                name: shown,
                verification,
            },
            reexpress,
        })
    }

    /// The task's interest expired without an answer: the task is finished.
    pub fn on_timeout(&mut self, id: TaskId) {
        self.finish(id);
    }

    fn finish(&mut self, id: TaskId) {
        self.active.remove(&id);
        self.tasks.remove(&id);
    }

    /// Drop every queued task; active ones finish on their own.
    pub fn cancel(&mut self) {
        for id in self.queued.drain(..) {
            self.tasks.remove(&id);
        }
    }

    pub fn prefix(&self, id: TaskId) -> Option<&Name> {
        self.tasks.get(&id).map(|t| &t.prefix)
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExploreError {
    #[error("unexpected upcall kind: {0}")]
    UnexpectedUpcall(String),
    #[error("unknown exploration task {0}")]
    UnknownTask(TaskId),
    #[error("response {got} does not extend prefix {expected}")]
    PrefixMismatch { expected: Name, got: Name },
    #[error("response has no name")]
    MissingName,
    #[error(transparent)]
    Content(#[from] ContentError),
}
