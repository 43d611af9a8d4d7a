//! Universe configuration.
//!
//! One value-typed [`Config`] replaces the attribute-builder dance: fill in
//! the fields (or lean on `Default`) and hand it to
//! [`Universe::init`](crate::core::Universe::init). The renderer and audio
//! sections exist as the contract the core exposes to those external
//! collaborators; the core itself only ever calls the [`RendererPlugin`]
//! hooks and threads the audio numbers through.

use std::path::PathBuf;

/// Asset root and subpaths for the external loaders.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Asset root directory.
    pub dir: PathBuf,
    /// Scripts subdirectory, also where schema files are looked up.
    pub scripts: String,
    /// Fonts subdirectory.
    pub fonts: String,
    /// Meshes subdirectory.
    pub meshes: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("resources"),
            scripts: "scripts".into(),
            fonts: "fonts".into(),
            meshes: "meshes".into(),
        }
    }
}

impl ResourceConfig {
    /// The directory schema and script files load from.
    pub fn scripts_dir(&self) -> PathBuf {
        self.dir.join(&self.scripts)
    }
}

/// Script host parameters.
#[derive(Debug, Clone, Default)]
pub struct ScriptConfig {
    /// Initial script file, relative to the scripts directory.
    pub entrypoint: String,
}

/// Audio subsystem parameters, consumed by the external mixer.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_frequency: u32,
    pub buffered_samples: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_frequency: 44_100,
            buffered_samples: 1024,
        }
    }
}

/// Worker pool and coroutine parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads for async tasks and coroutines. Zero means hardware
    /// concurrency.
    pub max_async_tasks: usize,
    /// Advisory queue depth for the worker pool.
    pub max_async_tasks_queue_size: usize,
    /// Stack reservation per coroutine fiber.
    pub coro_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_async_tasks: 0,
            max_async_tasks_queue_size: 1024,
            coro_stack_size: 1024 * 1024,
        }
    }
}

/// The renderer contract: the core drives these hooks, an external crate
/// implements them.
pub trait RendererPlugin: Send {
    /// Called once when the universe starts.
    fn on_start(&mut self) {}
    /// Called at the end of every tick.
    fn on_frame(&mut self, _dt: f64) {}
    /// Called once when the universe stops.
    fn on_stop(&mut self) {}
}

/// Universe configuration.
pub struct Config {
    /// Window title, for the external renderer.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Asset locations.
    pub resources: ResourceConfig,
    /// Script host parameters.
    pub script: ScriptConfig,
    /// Audio parameters.
    pub audio: AudioConfig,
    /// Worker pool and coroutine parameters.
    pub scheduler: SchedulerConfig,
    /// Component declaration cap.
    pub max_components: usize,
    /// Fixed-update timestep in seconds.
    pub fixed_timestep: f64,
    /// Renderer plug-in hooks.
    pub renderer: Option<Box<dyn RendererPlugin>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "kestrel".into(),
            width: 1280,
            height: 720,
            resources: ResourceConfig::default(),
            script: ScriptConfig::default(),
            audio: AudioConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_components: 1024,
            fixed_timestep: 1.0 / 60.0,
            renderer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();

        assert!(config.max_components > 0);
        assert!(config.scheduler.coro_stack_size >= 64 * 1024);
        assert_eq!(config.resources.scripts_dir(), PathBuf::from("resources/scripts"));
    }
}
