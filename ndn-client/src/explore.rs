//! Exploration driver: runs an [`ndn_core::Frontier`] against a connection.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use ndn_core::{Discovery, ExploreError, Frontier, Interest, Name, TaskId, Verification};

use crate::connection::{Connection, Handler, UpcallInfo, UpcallKind, UpcallResult};
use crate::ClientError;

struct Crawl {
    frontier: Frontier,
    handlers: HashMap<TaskId, Handler>,
    on_discovery: Box<dyn FnMut(&Discovery) + Send>,
    discovered: usize,
    failure: Option<ClientError>,
}

/// Crawl the name tree under `root` for up to `timeout`, reporting every discovered name.
///
/// Each prefix is explored by its own interest with a growing exclusion filter. At most
/// `max_active` prefixes have an interest outstanding at once (0: no limit). An upcall kind
/// other than content or timeout ends the crawl with [`ExploreError::UnexpectedUpcall`].
/// Returns the number of discoveries.
pub fn explore<F>(
    conn: &Connection,
    root: Name,
    template: Interest,
    max_active: usize,
    timeout: Duration,
    on_discovery: F,
) -> Result<usize, ClientError>
where
    F: FnMut(&Discovery) + Send + 'static,
{
    let crawl = Arc::new(Mutex::new(Crawl {
        frontier: Frontier::new(root, template, max_active),
        handlers: HashMap::new(),
        on_discovery: Box::new(on_discovery),
        discovered: 0,
        failure: None,
    }));
    {
        let mut c = crawl.lock();
        express_ready(&crawl, &mut c, conn)?;
    }
    conn.run(Some(timeout))?;
    let mut c = crawl.lock();
    c.frontier.cancel();
    match c.failure.take() {
        Some(e) => Err(e),
        None => Ok(c.discovered),
    }
}

fn express_ready(
    crawl: &Arc<Mutex<Crawl>>,
    c: &mut Crawl,
    conn: &Connection,
) -> Result<(), ClientError> {
    for (id, interest) in c.frontier.poll_ready() {
        let handler = task_handler(Arc::downgrade(crawl), id);
        conn.express_interest(&interest.name, &handler, Some(&interest))?;
        c.handlers.insert(id, handler);
    }
    Ok(())
}

fn task_handler(crawl: Weak<Mutex<Crawl>>, id: TaskId) -> Handler {
    Handler::new(move |conn, kind, info| match crawl.upgrade() {
        Some(crawl) => on_upcall(&crawl, conn, id, kind, info),
        None => UpcallResult::Ok,
    })
}

fn on_upcall(
    crawl: &Arc<Mutex<Crawl>>,
    conn: &Connection,
    id: TaskId,
    kind: UpcallKind,
    info: &UpcallInfo,
) -> UpcallResult {
    let mut c = crawl.lock();
    let outcome = match kind {
        UpcallKind::Final => {
            c.handlers.remove(&id);
            return UpcallResult::Ok;
        }
        UpcallKind::InterestTimedOut => {
            debug!(task = id, "exploration interest timed out");
            c.frontier.on_timeout(id);
            Ok(())
        }
        UpcallKind::Content | UpcallKind::ContentUnverified | UpcallKind::ContentBad => {
            on_content(crawl, &mut c, conn, id, kind, info)
        }
        other => Err(ExploreError::UnexpectedUpcall(format!("{:?}", other)).into()),
    };
    let outcome = outcome.and_then(|()| express_ready(crawl, &mut c, conn));
    match outcome {
        Ok(()) => {
            if c.frontier.is_finished() {
                conn.set_run_timeout(Duration::ZERO);
            }
            UpcallResult::Ok
        }
        Err(e) => {
            c.failure.get_or_insert(e);
            conn.set_run_timeout(Duration::ZERO);
            UpcallResult::Err
        }
    }
}

fn on_content(
    crawl: &Arc<Mutex<Crawl>>,
    c: &mut Crawl,
    conn: &Connection,
    id: TaskId,
    kind: UpcallKind,
    info: &UpcallInfo,
) -> Result<(), ClientError> {
    let verification = match kind {
        UpcallKind::Content => Verification::Valid,
        UpcallKind::ContentUnverified => Verification::Unverified,
        _ => Verification::Invalid,
    };
    let co = info.content.as_ref().ok_or(ExploreError::MissingName)?;
    let step = c.frontier.on_content(id, verification, co, info.matched_comps)?;
    c.discovered += 1;
    (c.on_discovery)(&step.discovery);
    let (id, interest) = step.reexpress;
    let handler = match c.handlers.get(&id) {
        Some(h) => h.clone(),
        None => {
            let h = task_handler(Arc::downgrade(crawl), id);
            c.handlers.insert(id, h.clone());
            h
        }
    };
    conn.express_interest(&interest.name, &handler, Some(&interest))?;
    Ok(())
}
