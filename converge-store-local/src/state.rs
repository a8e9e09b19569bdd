use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use serde_json::{de::IoRead, Deserializer, StreamDeserializer};
use std::{
    fs::{File, OpenOptions},
    io::{self, Seek as _, Write},
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};
use tracing::{debug, info, warn};

pub const STATE_TYPE: &str = "convergeState";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StateEvent {
    pub index: u64,
    pub meta: StateEventMeta,
    pub patch: json_patch::Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StateEventMeta {
    pub time: String,
    #[serde(flatten)]
    pub other_fields: serde_json::Value,
}

impl StateEventMeta {
    pub fn now(other_fields: serde_json::Value) -> StateEventMeta {
        StateEventMeta {
            time: Utc::now().to_rfc3339(),
            other_fields,
        }
    }
}

pub struct StateEventStream<'a, R: io::Read> {
    iter: StreamDeserializer<'a, IoRead<R>, StateEvent>,
    /// Save the validated first event for processing by our caller
    /// (basically prepend it to the iterator)
    first_event: Option<StateEvent>,
}
impl<'a, R: io::Read> StateEventStream<'a, R> {
    pub fn open_from_reader(reader: R) -> Result<StateEventStream<'a, R>> {
        let deserializer = Deserializer::from_reader(reader);
        let mut iter = deserializer.into_iter();
        let first_event = match iter.next() {
            Some(Ok(ev @ StateEvent { index, .. })) => {
                if index != 0 {
                    bail!("Expected initial state event with index 0, got {}", index);
                }
                ev
            }
            Some(Err(e)) => bail!(
                "State file invalid: error parsing initial state event: {}",
                e
            ),
            None => bail!("State file invalid: no initial state event"),
        };
        Ok(StateEventStream {
            iter,
            first_event: Some(first_event),
        })
    }
}

impl<'a, R: io::Read> Iterator for StateEventStream<'a, R> {
    type Item = Result<StateEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first_event.is_some() {
            self.first_event.take().map(Ok)
        } else {
            self.iter.next().map(|r| r.map_err(Into::into))
        }
    }
}

/// Monitor a task which may take a long time, and log progress as needed.
/// After SILENT_INTERVAL: log activity
/// After LOG_INTERVAL: log activity and duration
pub struct WaitMonitor {
    done: Arc<AtomicBool>,
}
impl WaitMonitor {
    const SILENT_INTERVAL: Duration = Duration::from_millis(500);
    const LOG_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(activity: &'static str) -> WaitMonitor {
        let done = Arc::new(AtomicBool::new(false));
        let r = WaitMonitor { done: done.clone() };
        std::thread::spawn(move || {
            WaitMonitor::run(done, activity);
        });
        r
    }
    fn run(done: Arc<AtomicBool>, activity: &'static str) {
        let start = std::time::Instant::now();
        let mut next_log = start + Self::SILENT_INTERVAL;
        loop {
            if done.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(next_log.saturating_duration_since(std::time::Instant::now()));
            if done.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
            let waited = next_log.duration_since(start);
            if waited <= Self::SILENT_INTERVAL {
                info!("{}", activity);
                // Reset before adding the large scale increment
                next_log = start;
            } else {
                info!(seconds = waited.as_secs(), "{}", activity);
            }
            next_log += Self::LOG_INTERVAL;
        }
    }
    pub fn done(&self) {
        self.done.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}
impl Drop for WaitMonitor {
    fn drop(&mut self) {
        self.done()
    }
}

/// Another writer appended to the state file after we last read it.
#[derive(Debug, thiserror::Error)]
#[error("concurrent write to the state file detected; foreign bytes [{expected}..{found})")]
pub struct ConcurrentWrite {
    pub expected: u64,
    pub found: u64,
}

/// The replayed state and the index the next event must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub state: serde_json::Value,
    pub next_index: u64,
}

impl StateSnapshot {
    pub fn apply(&mut self, event: &StateEvent) -> Result<()> {
        apply_state_event(&mut self.state, event)?;
        self.next_index = event.index + 1;
        Ok(())
    }
}

pub struct StateHandle {
    file: Arc<File>,
    locking: fd_lock::RwLock<Arc<File>>,
    /// The file size after our last read or write.
    expected_size: Option<u64>,
}
impl StateHandle {
    pub fn open<P: AsRef<Path>>(name: P, create_new: bool) -> Result<StateHandle> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(create_new)
            .open(name)?;
        let file = Arc::new(file);
        let locking = fd_lock::RwLock::new(file.clone());
        let mut handle = StateHandle {
            file,
            locking,
            expected_size: None,
        };
        if create_new {
            handle.append(&[&Self::init_event()])?;
        }
        Ok(handle)
    }
    fn init_event() -> StateEvent {
        StateEvent {
            index: 0,
            meta: StateEventMeta::now(serde_json::json!({})),
            patch: json_patch::Patch(vec![json_patch::PatchOperation::Add(
                json_patch::AddOperation {
                    path: "".parse().expect("empty path"),
                    value: serde_json::json!({
                        "_type": STATE_TYPE,
                        "objects": {},
                    }),
                },
            )]),
        }
    }
    fn lock_write(
        locking: &mut fd_lock::RwLock<Arc<File>>,
    ) -> Result<fd_lock::RwLockWriteGuard<Arc<File>>> {
        let lock_wait_mon = WaitMonitor::new("Waiting for state file write lock");
        let lock = locking.write()?;
        lock_wait_mon.done();
        Ok(lock)
    }

    /// Replay the whole log under a shared lock.
    pub fn read(&mut self) -> Result<StateSnapshot> {
        let lock_wait_mon = WaitMonitor::new("Waiting for state file read lock");
        let lock_guard = self.locking.read()?;
        lock_wait_mon.done();

        let mut file: &File = &self.file;
        file.seek(io::SeekFrom::Start(0))?;
        let stream = StateEventStream::open_from_reader(io::BufReader::new(file))?;
        let mut snapshot = StateSnapshot {
            state: serde_json::json!({}),
            next_index: 0,
        };
        for event in stream {
            let event = event?;
            if event.index != snapshot.next_index {
                bail!(
                    "State file invalid: expected event index {}, got {}",
                    snapshot.next_index,
                    event.index
                );
            }
            snapshot
                .apply(&event)
                .with_context(|| format!("applying state event {}", event.index))?;
        }
        self.expected_size = Some(self.file.metadata()?.len());

        drop(lock_guard);
        debug!(events = snapshot.next_index, "Read state file");
        Ok(snapshot)
    }

    /// Append events under an exclusive lock. Fails with [`ConcurrentWrite`]
    /// when the file grew since our last read or write.
    pub fn append(&mut self, event: &[&StateEvent]) -> Result<()> {
        let lock_guard = Self::lock_write(&mut self.locking)?;
        let pos = self.file.seek(io::SeekFrom::End(0))?;
        match self.expected_size {
            None => self.expected_size = Some(pos),
            Some(expected_size) => {
                if pos != expected_size {
                    warn!(
                        expected = expected_size,
                        found = pos,
                        "Detected concurrent writing; refusing to append"
                    );
                    return Err(ConcurrentWrite {
                        expected: expected_size,
                        found: pos,
                    }
                    .into());
                }
            }
        }
        let mut writer = io::BufWriter::new(self.file.clone());

        for event in event {
            // Prettified, so that the log stays readable by humans.
            serde_json::to_writer_pretty(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        self.expected_size = Some(self.file.stream_position()?);

        drop(lock_guard);
        Ok(())
    }
}

pub fn apply_state_event(state: &mut serde_json::Value, event: &StateEvent) -> Result<()> {
    json_patch::patch(state, event.patch.0.as_slice()).map_err(Into::into)
}

pub fn apply_state_events(
    state: &mut serde_json::Value,
    events: impl Iterator<Item = Result<StateEvent>>,
) -> Result<()> {
    for event in events {
        apply_state_event(state, &event?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_EXAMPLE: &str = r#"
    {
        "index": 0,
        "meta": {"time":"2019-03-04T07:40:00Z"},
        "patch": [
            {
                "op": "add",
                "value": { "_type": "convergeState", "objects": {} },
                "path": ""
            }
        ]
    }
    {
        "index": 1,
        "meta": {"time":"2019-03-04T07:41:00Z", "action": "create"},
        "patch": [
            {
                "op": "add",
                "value": { "mesh": { "management": "MANAGEMENT_AUTOMATIC" } },
                "path": "/objects/projects~1p~1memberships~1m"
            }
        ]
    }
"#;

    fn add_event(index: u64, path: &str, value: serde_json::Value) -> StateEvent {
        StateEvent {
            index,
            meta: StateEventMeta {
                time: "2019-03-04T07:41:00Z".to_owned(),
                other_fields: serde_json::json!({}),
            },
            patch: json_patch::Patch(vec![json_patch::PatchOperation::Add(
                json_patch::AddOperation {
                    path: path.parse().expect("valid path"),
                    value,
                },
            )]),
        }
    }

    #[test]
    fn test_open_state_stream() {
        let stream = StateEventStream::open_from_reader(BASIC_EXAMPLE.as_bytes()).unwrap();
        let events: Vec<_> = stream.collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().index, 0);
        assert_eq!(
            events[1].as_ref().unwrap().meta.other_fields,
            serde_json::json!({"action": "create"})
        );
    }

    #[test]
    fn test_resolve_state() {
        let stream = StateEventStream::open_from_reader(BASIC_EXAMPLE.as_bytes()).unwrap();
        let mut state = serde_json::json!({});
        apply_state_events(&mut state, stream).unwrap();
        assert_eq!(
            state,
            serde_json::json!({
                "_type": "convergeState",
                "objects": {
                    "projects/p/memberships/m": {
                        "mesh": { "management": "MANAGEMENT_AUTOMATIC" }
                    }
                }
            })
        );
    }

    #[test]
    fn test_open_state_stream_invalid_index() {
        let input = r#"{"index":1,"meta":{"time":"2019-06-04T07:40:00Z"},"patch":[]}"#;
        assert!(StateEventStream::open_from_reader(input.as_bytes()).is_err());
    }

    #[test]
    fn test_open_state_stream_empty() {
        assert!(StateEventStream::open_from_reader("".as_bytes()).is_err());
    }

    #[test]
    fn test_open_state_stream_no_patch() {
        let input = r#"{"index":0,"meta":{"time":"2019-06-04T07:40:00Z"}}"#;
        assert!(StateEventStream::open_from_reader(input.as_bytes()).is_err());
    }

    #[test]
    fn test_invalid_second() {
        let input = r#"{"index":0,"meta":{"time":"2019-06-04T07:40:00Z"},"patch":[]}
{"meta":{"time":"2019-06-04T07:40:00Z"}}"#;
        let stream = StateEventStream::open_from_reader(input.as_bytes()).unwrap();
        let vec: Vec<Result<StateEvent>> = stream.collect();
        assert!(vec[1].is_err());
    }

    #[test]
    fn test_state_file_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = StateHandle::open(&path, true).unwrap();
        state
            .append(&[&add_event(1, "/objects/a", serde_json::json!({"x": 1}))])
            .unwrap();

        let snapshot = StateHandle::open(&path, false).unwrap().read().unwrap();
        assert_eq!(snapshot.next_index, 2);
        assert_eq!(snapshot.state["_type"], STATE_TYPE);
        assert_eq!(snapshot.state["objects"]["a"], serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_read_rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = StateHandle::open(&path, true).unwrap();
        state
            .append(&[&add_event(5, "/objects/a", serde_json::json!({}))])
            .unwrap();
        let err = state.read().unwrap_err();
        assert!(err.to_string().contains("expected event index 1"), "{err}");
    }

    #[test]
    fn test_concurrent_writers_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut first = StateHandle::open(&path, true).unwrap();
        let mut second = StateHandle::open(&path, false).unwrap();
        second.read().unwrap();
        first.read().unwrap();

        second
            .append(&[&add_event(1, "/objects/a", serde_json::json!({}))])
            .unwrap();
        let err = first
            .append(&[&add_event(1, "/objects/b", serde_json::json!({}))])
            .unwrap_err();
        assert!(err.downcast_ref::<ConcurrentWrite>().is_some());

        // After catching up, writing works again.
        let snapshot = first.read().unwrap();
        first
            .append(&[&add_event(
                snapshot.next_index,
                "/objects/b",
                serde_json::json!({}),
            )])
            .unwrap();
        assert_eq!(second.read().unwrap().next_index, 3);
    }
}
