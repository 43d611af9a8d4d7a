pub mod clock;
pub mod config;
pub mod timer;
pub mod universe;

pub use clock::TickClock;
pub use config::{AudioConfig, Config, RendererPlugin, ResourceConfig, SchedulerConfig, ScriptConfig};
pub use timer::{FrameTimer, Stopwatch};
pub use universe::{LoopCallbacks, LoopStatus, SceneHandle, Universe};
