//! Fakes shared by the unit tests.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::LumaFrame;
use crate::ingest::{FrameSource, SourceOpener};
use crate::recording::{ExitKind, ProcessSpawner, RecordCommand, RecordingProcess, UploadSink};

// ----------------------------------------------------------------------------
// Recording processes
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SpawnerEvent {
    Spawned { pid: u32, source: String },
    Terminated { pid: u32 },
    ForceKilled { pid: u32 },
}

#[derive(Default)]
pub(crate) struct FakeSpawner {
    events: Arc<Mutex<Vec<SpawnerEvent>>>,
    next_pid: AtomicU32,
    fail: bool,
    write_output: bool,
}

impl FakeSpawner {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Spawned processes create their destination file, like a real recorder.
    pub(crate) fn writing_output() -> Self {
        Self {
            write_output: true,
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<SpawnerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn spawned(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SpawnerEvent::Spawned { .. }))
            .count()
    }

    pub(crate) fn terminated(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SpawnerEvent::Terminated { .. }))
            .count()
    }

    pub(crate) fn force_killed(&self) -> Vec<u32> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                SpawnerEvent::ForceKilled { pid } => Some(*pid),
                _ => None,
            })
            .collect()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, command: &RecordCommand) -> Result<Box<dyn RecordingProcess>> {
        if self.fail {
            return Err(anyhow!("recorder unavailable"));
        }
        if self.write_output {
            std::fs::write(&command.destination, b"fake mp4 payload")?;
        }
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(SpawnerEvent::Spawned {
            pid,
            source: command.source.clone(),
        });
        Ok(Box::new(FakeProcess {
            pid,
            events: self.events.clone(),
        }))
    }

    fn force_kill(&self, pid: u32) {
        self.events
            .lock()
            .unwrap()
            .push(SpawnerEvent::ForceKilled { pid });
    }
}

struct FakeProcess {
    pid: u32,
    events: Arc<Mutex<Vec<SpawnerEvent>>>,
}

impl RecordingProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate(&mut self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(SpawnerEvent::Terminated { pid: self.pid });
        Ok(())
    }

    fn wait(&mut self, _grace: Duration) -> Result<ExitKind> {
        Ok(ExitKind::Clean)
    }
}

pub(crate) struct FailingSink;

impl UploadSink for FailingSink {
    fn target(&self) -> &str {
        "dir:/unreachable"
    }

    fn put_file(&self, _local: &Path, _key: &str) -> Result<()> {
        Err(anyhow!("storage offline"))
    }
}

// ----------------------------------------------------------------------------
// Frame sources
// ----------------------------------------------------------------------------

pub(crate) const SCENE_WIDTH: u32 = 96;
pub(crate) const SCENE_HEIGHT: u32 = 64;

/// Shared switches for every source a `SceneOpener` hands out.
#[derive(Default)]
pub(crate) struct Scene {
    pub(crate) motion: AtomicBool,
    pub(crate) failing: AtomicBool,
    /// With motion off, the block stays where it last was instead of leaving.
    pub(crate) parked: AtomicBool,
    /// Reads block while set.
    pub(crate) hang: AtomicBool,
    /// Set while a read is blocked on `hang`.
    pub(crate) stalled: AtomicBool,
    pub(crate) panic_on_read: AtomicBool,
    pub(crate) reads: AtomicU64,
    pub(crate) opened: Mutex<Vec<String>>,
}

impl Scene {
    pub(crate) fn set_motion(&self, on: bool) {
        self.motion.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_parked(&self, on: bool) {
        self.parked.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }

    pub(crate) fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_panic_on_read(&self, on: bool) {
        self.panic_on_read.store(on, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

/// With motion on, consecutive frames show a 32x32 block at alternating
/// positions; with motion off every frame is the same flat background, or the
/// same parked block when `parked` is set.
#[derive(Clone, Default)]
pub(crate) struct SceneOpener {
    pub(crate) scene: Arc<Scene>,
}

impl SourceOpener for SceneOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>> {
        self.scene
            .opened
            .lock()
            .unwrap()
            .push(identifier.to_string());
        Ok(Box::new(SceneSource {
            identifier: identifier.to_string(),
            scene: self.scene.clone(),
            count: 0,
            block_x: None,
        }))
    }
}

struct SceneSource {
    identifier: String,
    scene: Arc<Scene>,
    count: u64,
    block_x: Option<u32>,
}

impl FrameSource for SceneSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read_frame(&mut self) -> Result<LumaFrame> {
        self.scene.reads.fetch_add(1, Ordering::SeqCst);
        while self.scene.hang.load(Ordering::SeqCst) {
            self.scene.stalled.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
        }
        self.scene.stalled.store(false, Ordering::SeqCst);
        if self.scene.panic_on_read.load(Ordering::SeqCst) {
            panic!("decoder state corrupted");
        }
        if self.scene.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }
        self.count += 1;
        let mut frame = LumaFrame::filled(SCENE_WIDTH, SCENE_HEIGHT, 10);
        if self.scene.motion.load(Ordering::SeqCst) {
            self.block_x = Some(if self.count % 2 == 0 { 0 } else { 48 });
        } else if !self.scene.parked.load(Ordering::SeqCst) {
            self.block_x = None;
        }
        if let Some(x) = self.block_x {
            frame.fill_rect(x, 0, 32, 32, 250);
        }
        Ok(frame)
    }
}
