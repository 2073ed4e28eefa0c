//! Pipeline context — the control-side owner of a pipeline.
//!
//! Ties the editable [`Pipeline`] to its undo [`History`], the realtime
//! executor (through a [`PipelineController`]) and an [`OfflineRenderer`].
//! Edits happen on the pipeline directly; `commit` publishes the result.

use rtrb::PushError;

use crate::config::EngineConfig;
use crate::dsp::AudioBuffer;
use crate::error::{FileProcessingError, ValidationError};
use crate::history::{self, History};
use crate::offline::{CancelHandle, OfflineRenderer, RenderOutcome};
use crate::pipeline::Pipeline;
use crate::plugin::PluginId;
use crate::preset::{Preset, ShortPreset};
use crate::realtime::{Command, PipelineController};

pub struct PipelineContext {
    pipeline: Pipeline,
    history: History,
    controller: Option<PipelineController>,
    offline: OfflineRenderer,
}

impl PipelineContext {
    pub fn new(config: EngineConfig) -> Self {
        let mut history = History::new(config.history_limit);
        let pipeline = Pipeline::new();
        history.save(&pipeline);
        Self {
            pipeline,
            history,
            controller: None,
            offline: OfflineRenderer::new(config),
        }
    }

    /// Connect to a realtime executor and send it the current state.
    pub fn attach(&mut self, controller: PipelineController) -> Result<(), PushError<Command>> {
        self.controller = Some(controller);
        self.publish()
    }

    pub fn detach(&mut self) -> Option<PipelineController> {
        self.controller.take()
    }

    pub fn controller_mut(&mut self) -> Option<&mut PipelineController> {
        self.controller.as_mut()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Mutable access for structural edits. Call [`commit`](Self::commit)
    /// afterwards.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn publish(&mut self) -> Result<(), PushError<Command>> {
        match &mut self.controller {
            Some(ctl) => ctl.update_plugins(self.pipeline.snapshot(), self.pipeline.master_bypass()),
            None => Ok(()),
        }
    }

    /// Record the current state in history and send the full plugin list.
    pub fn commit(&mut self) -> Result<(), PushError<Command>> {
        self.history.save(&self.pipeline);
        self.publish()
    }

    /// Send one plugin's current state without resending the list. Used
    /// for parameter changes; not recorded in history.
    pub fn update_plugin(&mut self, id: PluginId) -> Result<(), PushError<Command>> {
        let (Some(ctl), Some(plugin)) = (&mut self.controller, self.pipeline.get(id)) else {
            return Ok(());
        };
        ctl.update_plugin(plugin.snapshot())
    }

    pub fn set_master_bypass(&mut self, bypass: bool) -> Result<(), PushError<Command>> {
        self.pipeline.set_master_bypass(bypass);
        match &mut self.controller {
            Some(ctl) => ctl.set_master_bypass(bypass),
            None => Ok(()),
        }
    }

    /// Step back one history entry. Returns false when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> Result<bool, PushError<Command>> {
        let Some(state) = self.history.undo() else {
            return Ok(false);
        };
        history::restore(&mut self.pipeline, state);
        self.publish()?;
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, PushError<Command>> {
        let Some(state) = self.history.redo() else {
            return Ok(false);
        };
        history::restore(&mut self.pipeline, state);
        self.publish()?;
        Ok(true)
    }

    /// Replace the pipeline with a preset's plugins. Invalid entries are
    /// skipped and returned; the rest load.
    pub fn load_preset(&mut self, preset: &Preset) -> Vec<ValidationError> {
        let states = preset.short_states();
        let (loaded, errors) = Pipeline::from_states(&states);
        self.pipeline.replace_all(loaded.plugins().to_vec());
        if let Err(e) = self.commit() {
            log::warn!("Command queue full, preset '{}' not sent: {e}", preset.name());
        }
        errors
    }

    pub fn to_preset(&self, name: &str) -> ShortPreset {
        ShortPreset {
            name: name.to_string(),
            plugins: self.pipeline.to_short_states(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.offline.cancel_handle()
    }

    /// Render `input` offline through a snapshot of the current pipeline.
    pub fn render(
        &self,
        input: &AudioBuffer,
        progress: &mut dyn FnMut(u8),
    ) -> Result<RenderOutcome, FileProcessingError> {
        self.offline.render(input, &self.pipeline.snapshot(), progress)
    }

    pub fn renderer(&self) -> &OfflineRenderer {
        &self.offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginInstance, PluginKind};
    use crate::realtime::{DeviceConfig, ExecutorState, realtime_channel};

    fn attached() -> (PipelineContext, crate::realtime::RealtimeExecutor) {
        let config = EngineConfig::default();
        let (ctl, mut exec) = realtime_channel(&config);
        exec.connect(DeviceConfig {
            sample_rate: 48_000,
            channels: 2,
            block_size: 128,
        })
        .unwrap();
        let mut ctx = PipelineContext::new(config);
        ctx.attach(ctl).unwrap();
        (ctx, exec)
    }

    fn tick(exec: &mut crate::realtime::RealtimeExecutor) -> Vec<f32> {
        let mut out = vec![0.0; 256];
        exec.process(&[1.0; 256], &mut out);
        out
    }

    #[test]
    fn commit_reaches_executor() {
        let (mut ctx, mut exec) = attached();
        ctx.pipeline_mut().push(PluginInstance::new(PluginKind::Mute));
        ctx.commit().unwrap();
        assert_eq!(tick(&mut exec), vec![0.0; 256]);
        assert_eq!(exec.state(), ExecutorState::Running);

        ctx.set_master_bypass(true).unwrap();
        assert_eq!(tick(&mut exec), vec![1.0; 256]);
    }

    #[test]
    fn parameter_update_is_targeted() {
        let (mut ctx, mut exec) = attached();
        let id = ctx.pipeline_mut().push(PluginInstance::new(PluginKind::Delay));
        ctx.commit().unwrap();
        tick(&mut exec);

        ctx.pipeline_mut().get_mut(id).unwrap().set_param("fb", 10.0);
        ctx.update_plugin(id).unwrap();
        tick(&mut exec);
        assert!(exec.engine().has_context(id));
        assert_eq!(exec.plugins()[0].parameters.number("fb"), Some(10.0));
        assert_eq!(ctx.history().len(), 2, "parameter updates are not history");
    }

    #[test]
    fn undo_rebuilds_and_publishes() {
        let (mut ctx, mut exec) = attached();
        ctx.pipeline_mut().push(PluginInstance::new(PluginKind::Volume));
        ctx.commit().unwrap();
        ctx.pipeline_mut().push(PluginInstance::new(PluginKind::Mute));
        ctx.commit().unwrap();
        assert_eq!(tick(&mut exec), vec![0.0; 256]);

        assert!(ctx.undo().unwrap());
        assert_eq!(ctx.pipeline().len(), 1);
        assert_eq!(tick(&mut exec), vec![1.0; 256]);

        assert!(ctx.redo().unwrap());
        assert_eq!(ctx.pipeline().len(), 2);
        assert!(!ctx.redo().unwrap());
    }

    #[test]
    fn preset_load_skips_bad_entries() {
        let mut ctx = PipelineContext::new(EngineConfig::default());
        let preset = Preset::from_json(
            r#"{"name":"p","plugins":[{"nm":"Volume","vl":-3},{"nm":"Nope"},{"nm":"Mute"}]}"#,
        )
        .unwrap();
        let errors = ctx.load_preset(&preset);
        assert_eq!(errors.len(), 1);
        assert_eq!(ctx.pipeline().len(), 2);
        let saved = ctx.to_preset("p");
        assert_eq!(saved.plugins.len(), 2);
        assert_eq!(saved.plugins[0].nm, "Volume");
    }

    #[test]
    fn render_uses_current_pipeline() {
        let mut ctx = PipelineContext::new(EngineConfig::default());
        ctx.pipeline_mut().push(PluginInstance::new(PluginKind::PolarityInversion));
        let input = AudioBuffer {
            sample_rate: 48_000,
            channels: vec![vec![0.25; 200]],
        };
        let out = ctx.render(&input, &mut |_| {}).unwrap().completed().unwrap();
        assert_eq!(out.channels[0], vec![-0.25; 200]);
    }
}
