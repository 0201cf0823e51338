//! Background workers for contouring and phase portraits.
//!
//! Each worker owns a fresh [`EngineContext`]; nothing cached crosses the
//! thread boundary. Workers poll a [`CancellationToken`] between rows (or
//! seeds) and send exactly one result over a channel.

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::contour::{
    extract_surface, monotonic_clock, ContourSampler, ContourSegment, SurfaceBounds, SurfaceMesh,
    Viewport,
};
use crate::error::{EngineError, EngineResult};
use crate::ode::{PhasePortrait, PhasePortraitRequest, PhaseTrajectory};
use anyhow::{anyhow, Context};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

const ROWS_PER_CHECK: usize = 4;
const SEEDS_PER_CHECK: usize = 1;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A running job. Dropping the handle cancels it.
pub struct JobHandle<T> {
    receiver: mpsc::Receiver<anyhow::Result<T>>,
    token: CancellationToken,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The result if the worker has finished, without blocking.
    pub fn try_result(&self) -> Option<anyhow::Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                Some(Err(anyhow!("job worker exited without a result")))
            }
        }
    }

    /// Blocks until the worker reports.
    pub fn wait(self) -> anyhow::Result<T> {
        self.receiver
            .recv()
            .context("job worker exited without a result")?
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn spawn<T, F>(name: &str, work: F) -> anyhow::Result<JobHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let token = CancellationToken::new();
    let worker_token = token.clone();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = work(&worker_token);
            if let Err(err) = &result {
                log::debug!("job finished with error: {err:#}");
            }
            // The receiver is gone when the caller already moved on.
            let _ = sender.send(result);
        })
        .with_context(|| format!("failed to spawn {name} worker"))?;
    Ok(JobHandle { receiver, token })
}

fn worker_context(config: EngineConfig, definitions: Option<&str>) -> anyhow::Result<EngineContext> {
    let mut ctx = EngineContext::new(config);
    if let Some(text) = definitions.filter(|t| !t.trim().is_empty()) {
        ctx.define_functions(text)
            .context("invalid user function definitions")?;
    }
    Ok(ctx)
}

/// Contours `expression` on a worker thread.
pub fn spawn_contour_job(
    config: EngineConfig,
    definitions: Option<String>,
    expression: String,
    viewport: Viewport,
    grid: usize,
) -> anyhow::Result<JobHandle<Vec<ContourSegment>>> {
    spawn("calcite-contour", move |token| {
        trace_contour(token, config, definitions.as_deref(), &expression, viewport, grid)
    })
}

fn trace_contour(
    token: &CancellationToken,
    config: EngineConfig,
    definitions: Option<&str>,
    expression: &str,
    viewport: Viewport,
    grid: usize,
) -> anyhow::Result<Vec<ContourSegment>> {
    let mut ctx = worker_context(config, definitions)?;
    let mut sampler = ContourSampler::new(&mut ctx, expression, viewport, grid)
        .with_context(|| format!("cannot contour '{expression}'"))?;
    while !sampler.is_done() {
        token.check()?;
        sampler.sample_rows(ROWS_PER_CHECK);
    }
    token.check()?;
    Ok(sampler.finish())
}

/// Extracts a 3D isosurface on a worker thread, bounded by
/// `config.surface_timeout_ms`. A timed-out mesh is still a successful result.
pub fn spawn_surface_job(
    config: EngineConfig,
    definitions: Option<String>,
    expression: String,
    bounds: SurfaceBounds,
    grid: usize,
) -> anyhow::Result<JobHandle<SurfaceMesh>> {
    spawn("calcite-surface", move |token| {
        let mut ctx = worker_context(config, definitions.as_deref())?;
        let timeout = ctx.config.surface_timeout_ms as f64;
        token.check()?;
        let mesh = extract_surface(&mut ctx, &expression, bounds, grid, timeout, monotonic_clock())
            .with_context(|| format!("cannot triangulate '{expression}'"))?;
        token.check()?;
        Ok(mesh)
    })
}

/// Integrates every seed of a phase portrait on a worker thread.
pub fn spawn_phase_portrait_job(
    config: EngineConfig,
    definitions: Option<String>,
    request: PhasePortraitRequest,
) -> anyhow::Result<JobHandle<Vec<PhaseTrajectory>>> {
    spawn("calcite-phase-portrait", move |token| {
        let mut ctx = worker_context(config, definitions.as_deref())?;
        let mut portrait = PhasePortrait::new(&mut ctx, &request)
            .context("cannot build phase portrait")?;
        while !portrait.is_done() {
            token.check()?;
            portrait.advance(SEEDS_PER_CHECK);
        }
        Ok(portrait.into_trajectories())
    })
}

#[cfg(test)]
mod tests {
    use super::{
        spawn_contour_job, spawn_phase_portrait_job, spawn_surface_job, trace_contour,
        CancellationToken,
    };
    use crate::config::EngineConfig;
    use crate::contour::{assemble_rings, SurfaceBounds, Viewport};
    use crate::error::EngineError;
    use crate::ode::PhasePortraitRequest;

    #[test]
    fn contour_job_reports_segments() {
        let job = spawn_contour_job(
            EngineConfig::default(),
            None,
            "x^2 + y^2 = 4".to_string(),
            Viewport::new(-5.0, 5.0, -5.0, 5.0),
            64,
        )
        .expect("spawn");
        let segments = job.wait().expect("segments");
        let rings = assemble_rings(&segments, 1e-6);
        assert_eq!(rings.len(), 1);
        assert!(rings[0].closed);
    }

    #[test]
    fn contour_job_uses_definitions() {
        let job = spawn_contour_job(
            EngineConfig::default(),
            Some("f(x) = x^2".to_string()),
            "f(x) + f(y) - 1".to_string(),
            Viewport::new(-2.0, 2.0, -2.0, 2.0),
            32,
        )
        .expect("spawn");
        assert!(!job.wait().expect("segments").is_empty());
    }

    #[test]
    fn cancelled_jobs_report_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let err = trace_contour(
            &token,
            EngineConfig::default(),
            None,
            "sin(x*y) - 0.1",
            Viewport::new(-50.0, 50.0, -50.0, 50.0),
            256,
        )
        .unwrap_err();
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::Cancelled));
    }

    #[test]
    fn cancelling_a_running_job_still_yields_one_result() {
        let job = spawn_contour_job(
            EngineConfig::default(),
            None,
            "sin(x*y) - 0.1".to_string(),
            Viewport::new(-50.0, 50.0, -50.0, 50.0),
            256,
        )
        .expect("spawn");
        job.cancel();
        match job.wait() {
            Ok(segments) => assert!(!segments.is_empty()),
            Err(err) => assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::Cancelled)),
        }
    }

    #[test]
    fn invalid_expressions_fail_with_context() {
        let job = spawn_contour_job(
            EngineConfig::default(),
            None,
            "x + z".to_string(),
            Viewport::new(-1.0, 1.0, -1.0, 1.0),
            8,
        )
        .expect("spawn");
        let err = job.wait().unwrap_err();
        assert!(format!("{err:#}").contains("unexpected variable 'z'"), "{err:#}");
    }

    #[test]
    fn phase_portrait_job_traces_every_seed() {
        let request = PhasePortraitRequest {
            dx: "y".to_string(),
            dy: "-x".to_string(),
            x_range: (-1.0, 1.0),
            y_range: (-1.0, 1.0),
            seeds_per_axis: 3,
            duration: 1.0,
            steps: 50,
        };
        let job = spawn_phase_portrait_job(EngineConfig::default(), None, request).expect("spawn");
        let trajectories = job.wait().expect("trajectories");
        assert_eq!(trajectories.len(), 9);
        assert!(trajectories.iter().all(|t| t.points.len() == 51));
    }

    #[test]
    fn surface_job_returns_a_mesh() {
        let bounds = SurfaceBounds {
            min: [-1.5; 3],
            max: [1.5; 3],
        };
        let job = spawn_surface_job(
            EngineConfig::default(),
            None,
            "x^2 + y^2 + z^2 = 1".to_string(),
            bounds,
            10,
        )
        .expect("spawn");
        let mesh = job.wait().expect("mesh");
        assert!(!mesh.triangles.is_empty());
        assert!(!mesh.timed_out);
    }

    #[test]
    fn tokens_are_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert_eq!(token.check(), Err(EngineError::Cancelled));
    }
}
