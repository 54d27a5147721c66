//! Drives the renderer for a whole run and turns its output into a dataset.

pub mod renderer;

use std::fs;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::dataset::annotation::{rewrite_annotation, NormalizeOutcome};
use crate::dataset::class_table::{ClassTable, WidgetKind};
use crate::dataset::common_structs::Sample;
use crate::dataset::manifest::{ManifestFiles, ManifestWriter, RunReport};
use crate::dataset::path_rewriter::RewrittenFile;
use crate::dataset::split::resolve_seed;
use crate::dataset::split_assembler::{AssembledDataset, SplitAssembler};
use crate::error::{DatasetError, DatasetResult};
use renderer::{RenderRequest, Renderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Rendering,
    Collecting,
    Splitting,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct CaptureOutcome {
    pub dataset: AssembledDataset,
    pub manifest: ManifestFiles,
    pub report: RunReport,
    /// Descriptor files touched by the prefix rewrite, if one was requested.
    pub rewritten: Vec<RewrittenFile>,
}

#[derive(Debug)]
struct StateLog {
    history: Vec<DriverState>,
}

impl StateLog {
    fn current(&self) -> DriverState {
        self.history.last().copied().unwrap_or(DriverState::Idle)
    }

    fn transition(&mut self, next: DriverState) {
        let current = self.current();
        if current != next {
            debug!("{:?} -> {:?}", current, next);
            self.history.push(next);
        }
    }
}

pub struct CaptureDriver<R: Renderer> {
    config: CaptureConfig,
    renderer: R,
    states: StateLog,
    invocations: usize,
}

impl<R: Renderer> CaptureDriver<R> {
    pub fn new(config: CaptureConfig, renderer: R) -> CaptureDriver<R> {
        CaptureDriver {
            config,
            renderer,
            states: StateLog {
                history: vec![DriverState::Idle],
            },
            invocations: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.states.current()
    }

    /// Every state the driver went through, starting with `Idle`.
    /// Repeated rendering/collecting rounds show up once per round.
    pub fn history(&self) -> &[DriverState] {
        &self.states.history
    }

    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// The render requests of this run, in order.
    pub fn requests(&self) -> Vec<RenderRequest> {
        let config = &self.config;
        let request = |widgets: Vec<WidgetKind>, base_name: String| RenderRequest {
            output_folder: config.output_folder.clone(),
            base_name,
            width: config.width,
            height: config.height,
            widget_count: config.widget_count.count(),
            widgets,
            delay_count: config.delay_count,
            layout: config.layout.clone(),
        };
        let mut requests = vec![];
        for i in 0..config.iterations {
            if config.split_widgets {
                for widget in &config.widgets {
                    requests.push(request(vec![*widget], format!("ui_{}_{}", widget, i)));
                }
            } else {
                let joined = config.widgets.iter().join("-");
                requests.push(request(config.widgets.clone(), format!("ui_{}_{}", joined, i)));
            }
        }
        requests
    }

    /// Render, collect, split and describe. Any error leaves the driver in
    /// `Failed` and no dataset root behind.
    pub fn run(&mut self) -> DatasetResult<CaptureOutcome> {
        if self.state() != DriverState::Idle {
            return Err(DatasetError::InvalidConfig(
                "a capture driver can only run once".to_string(),
            ));
        }
        match self.run_inner() {
            Ok(outcome) => {
                self.states.transition(DriverState::Done);
                Ok(outcome)
            }
            Err(err) => {
                self.states.transition(DriverState::Failed);
                Err(err)
            }
        }
    }

    fn run_inner(&mut self) -> DatasetResult<CaptureOutcome> {
        let classes = self.config.class_table()?;
        let dataset_root = self.config.dataset_root();
        if dataset_root.exists() {
            return Err(DatasetError::InvalidConfig(format!(
                "dataset root {} already exists",
                dataset_root.display()
            )));
        }
        let output = &self.config.output_folder;
        fs::create_dir_all(output).map_err(DatasetError::io_at(output))?;

        let requests = self.requests();
        info!(
            "rendering {} screens of {} into {}",
            requests.len(),
            self.config.widgets.iter().join(","),
            output.display()
        );
        let mut samples = Vec::with_capacity(requests.len());
        for request in &requests {
            self.states.transition(DriverState::Rendering);
            let sample = self.renderer.render(request)?;
            self.invocations += 1;
            self.states.transition(DriverState::Collecting);
            collect(&sample, &classes, &self.config)?;
            samples.push(sample);
        }

        self.states.transition(DriverState::Splitting);
        let seed = resolve_seed(self.config.seed);
        info!("splitting {} samples with seed {}", samples.len(), seed);
        let ratio = self.config.split_ratio;
        let invocations = self.invocations;
        let writer = ManifestWriter::new(&self.config.dataset_name, &classes)
            .with_list_prefix(self.config.list_prefix.as_ref());
        let (dataset, (manifest, report)) = SplitAssembler::new(ratio, seed).assemble(
            samples,
            &dataset_root,
            |staged| {
                let report = RunReport::new(staged, &classes, ratio, invocations);
                let files = writer.write(staged, &report)?;
                Ok((files, report))
            },
        )?;

        let rewritten = match &self.config.list_prefix {
            Some(pair) => self
                .config
                .rewrite
                .rewriter(pair.clone())
                .rewrite_tree(dataset.layout.root())?,
            None => vec![],
        };
        info!("dataset ready at {}", dataset.layout.root().display());
        Ok(CaptureOutcome {
            dataset,
            manifest,
            report,
            rewritten,
        })
    }
}

/// Turn a freshly rendered pair into trainer input: numeric classes and
/// normalized geometry.
fn collect(sample: &Sample, classes: &ClassTable, config: &CaptureConfig) -> DatasetResult<()> {
    sample.check_pair()?;
    let (width, height) =
        image::image_dimensions(sample.image()).map_err(|source| DatasetError::Image {
            path: sample.image().to_path_buf(),
            source,
        })?;
    if (width, height) != (config.width, config.height) {
        warn!(
            "{} is {}x{}, requested {}x{}; normalizing against the actual size",
            sample.image().display(),
            width,
            height,
            config.width,
            config.height
        );
    }
    let summary = rewrite_annotation(sample.label(), classes, Some((width, height)))?;
    if let Some(NormalizeOutcome::Normalized { dropped, .. }) = summary.normalize {
        if dropped > 0 {
            warn!("{}: {} boxes outside the frame dropped", sample.base_name(), dropped);
        }
    }
    debug!("collected {}", sample.base_name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureOverrides, WidgetCount};
    use std::path::PathBuf;

    struct NoopRenderer;

    impl Renderer for NoopRenderer {
        fn render(&mut self, request: &RenderRequest) -> DatasetResult<Sample> {
            Ok(request.expected_sample())
        }
    }

    fn config(split_widgets: bool, iterations: usize) -> CaptureConfig {
        CaptureConfig::resolve(
            CaptureOverrides {
                app_path: Some(PathBuf::from("ui")),
                output_folder: Some(PathBuf::from("/out")),
                widgets: vec![WidgetKind::Button, WidgetKind::Switch],
                widget_count: Some(WidgetCount::Multi(3)),
                iterations: Some(iterations),
                split_widgets,
                ..Default::default()
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn mixed_mode_requests() {
        let driver = CaptureDriver::new(config(false, 2), NoopRenderer);
        let requests = driver.requests();
        let names: Vec<&str> = requests.iter().map(|r| r.base_name.as_str()).collect();
        assert_eq!(names, vec!["ui_button-switch_0", "ui_button-switch_1"]);
        assert!(requests.iter().all(|r| r.widget_count == 3 && r.widgets.len() == 2));
    }

    #[test]
    fn split_widgets_requests() {
        let driver = CaptureDriver::new(config(true, 2), NoopRenderer);
        let names: Vec<String> = driver.requests().into_iter().map(|r| r.base_name).collect();
        assert_eq!(
            names,
            vec!["ui_button_0", "ui_switch_0", "ui_button_1", "ui_switch_1"]
        );
    }

    #[test]
    fn state_log_skips_repeats() {
        let mut log = StateLog {
            history: vec![DriverState::Idle],
        };
        log.transition(DriverState::Rendering);
        log.transition(DriverState::Rendering);
        log.transition(DriverState::Failed);
        assert_eq!(
            log.history,
            vec![DriverState::Idle, DriverState::Rendering, DriverState::Failed]
        );
        assert_eq!(log.current(), DriverState::Failed);
    }
}
