//! Render lifecycle for the inline and fullscreen surfaces.
//!
//! A dispatch is split in two halves so that no borrow of the engine is held across the
//! compiler's suspension point:
//!
//! 1. [`RenderEngine::dispatch`] records a fresh [`RequestToken`] as current for the surface,
//!    clears the surface and returns a [`PendingRender`] wrapping the compiler future.
//! 2. The host awaits [`PendingRender::run`] on its event loop and hands the resulting
//!    [`CompletedRender`] back to [`RenderEngine::resolve`], which installs it only if its token
//!    is still the surface's current one.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};

use crate::classify::ErrorInfo;
use crate::compiler::{CompileError, CompileResult, DiagramCompiler, InitOnce};
use crate::config::ConfigMap;
use crate::model::{
    DiagramRequest, MountedVisual, RenderOutcome, RenderStatus, RequestToken, SurfaceKind,
};
use crate::svg::{apply_surface_sizing, id_token, render_id};

pub const DEFAULT_ID_PREFIX: &str = "diorama";

/// A dispatched render waiting on the compiler.
pub struct PendingRender {
    request: DiagramRequest,
    token: RequestToken,
    diagram_id: String,
    future: LocalBoxFuture<'static, CompileResult>,
}

impl fmt::Debug for PendingRender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRender")
            .field("surface", &self.request.target)
            .field("token", &self.token)
            .field("diagram_id", &self.diagram_id)
            .finish_non_exhaustive()
    }
}

impl PendingRender {
    pub fn request(&self) -> &DiagramRequest {
        &self.request
    }

    pub fn surface(&self) -> SurfaceKind {
        self.request.target
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn diagram_id(&self) -> &str {
        &self.diagram_id
    }

    /// Awaits the compiler. Panics raised while polling are turned into a [`CompileError`].
    pub async fn run(self) -> CompletedRender {
        let result = AssertUnwindSafe(self.future)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(CompileError::from_panic(payload)));
        CompletedRender {
            surface: self.request.target,
            token: self.token,
            diagram_id: self.diagram_id,
            result,
        }
    }
}

/// Compiler output tagged with the request it belongs to.
#[derive(Debug)]
pub struct CompletedRender {
    surface: SurfaceKind,
    token: RequestToken,
    diagram_id: String,
    result: CompileResult,
}

impl CompletedRender {
    pub fn surface(&self) -> SurfaceKind {
        self.surface
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn result(&self) -> &CompileResult {
        &self.result
    }
}

/// What [`RenderEngine::resolve`] did with a completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Rendered,
    Failed(ErrorInfo),
    /// A newer request owns the surface; the completion was dropped.
    Stale,
}

type RenderCallback = Rc<RefCell<dyn FnMut()>>;
type ErrorCallback = Rc<RefCell<dyn FnMut(&CompileError)>>;

enum Notice {
    Rendered(RenderCallback),
    Failed(ErrorCallback, CompileError),
}

/// A host callback owed for one resolution, detached from the engine.
///
/// Returned by [`RenderEngine::resolve_deferred`] so the caller can release its borrow of the
/// engine (or of whatever owns it) before the callback runs.
#[must_use = "the host callback only runs when the notification is fired"]
pub struct Notification(Notice);

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Notice::Rendered(_) => f.write_str("Notification::Rendered"),
            Notice::Failed(_, err) => f.debug_tuple("Notification::Failed").field(err).finish(),
        }
    }
}

impl Notification {
    /// Runs the callback. A callback that is already running further up the stack is skipped.
    pub fn fire(self) {
        match self.0 {
            Notice::Rendered(callback) => match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(),
                Err(_) => tracing::warn!("render callback re-entered; skipping"),
            },
            Notice::Failed(callback, err) => match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut *callback)(&err),
                Err(_) => tracing::warn!("error callback re-entered; skipping"),
            },
        }
    }
}

#[derive(Debug, Default)]
struct SurfaceSlot {
    current: Option<RequestToken>,
    request: Option<DiagramRequest>,
    outcome: Option<RenderOutcome>,
}

pub struct RenderEngine {
    compiler: Rc<dyn DiagramCompiler>,
    init: &'static InitOnce,
    config: Rc<ConfigMap>,
    id_prefix: String,
    next_token: u64,
    inline: SurfaceSlot,
    fullscreen: SurfaceSlot,
    on_render: Option<RenderCallback>,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderEngine")
            .field("config", &self.config)
            .field("id_prefix", &self.id_prefix)
            .field("next_token", &self.next_token)
            .field("inline", &self.inline)
            .field("fullscreen", &self.fullscreen)
            .finish_non_exhaustive()
    }
}

impl RenderEngine {
    pub fn new(compiler: Rc<dyn DiagramCompiler>) -> Self {
        Self {
            compiler,
            init: InitOnce::global(),
            config: Rc::new(ConfigMap::engine_defaults()),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            next_token: 0,
            inline: SurfaceSlot::default(),
            fullscreen: SurfaceSlot::default(),
            on_render: None,
            on_error: None,
        }
    }

    /// Merges `config` over the engine defaults.
    pub fn with_config(mut self, config: &ConfigMap) -> Self {
        self.config = Rc::new(ConfigMap::engine_defaults().merged(config));
        self
    }

    /// Uses `guard` instead of the process-wide [`InitOnce::global`].
    pub fn with_init_guard(mut self, guard: &'static InitOnce) -> Self {
        self.init = guard;
        self
    }

    pub fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.id_prefix = id_token(prefix);
        self
    }

    pub fn set_on_render(&mut self, callback: impl FnMut() + 'static) {
        self.on_render = Some(Rc::new(RefCell::new(callback)));
    }

    pub fn set_on_error(&mut self, callback: impl FnMut(&CompileError) + 'static) {
        self.on_error = Some(Rc::new(RefCell::new(callback)));
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    fn slot(&self, surface: SurfaceKind) -> &SurfaceSlot {
        match surface {
            SurfaceKind::Inline => &self.inline,
            SurfaceKind::Fullscreen => &self.fullscreen,
        }
    }

    fn slot_mut(&mut self, surface: SurfaceKind) -> &mut SurfaceSlot {
        match surface {
            SurfaceKind::Inline => &mut self.inline,
            SurfaceKind::Fullscreen => &mut self.fullscreen,
        }
    }

    fn issue_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken::new(self.next_token)
    }

    fn ensure_compiler_initialized(&self) {
        let compiler = Rc::clone(&self.compiler);
        let init = self.init;
        let config = Rc::clone(&self.config);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            init.ensure(&config, |cfg| compiler.initialize(cfg))
        }));
        if outcome.is_err() {
            tracing::warn!("diagram compiler initialization panicked; will retry on next dispatch");
        }
    }

    pub fn outcome(&self, surface: SurfaceKind) -> Option<&RenderOutcome> {
        self.slot(surface).outcome.as_ref()
    }

    pub fn visual(&self, surface: SurfaceKind) -> Option<&MountedVisual> {
        self.outcome(surface)?.visual.as_ref()
    }

    pub fn error(&self, surface: SurfaceKind) -> Option<&ErrorInfo> {
        self.outcome(surface)?.error.as_ref()
    }

    pub fn is_pending(&self, surface: SurfaceKind) -> bool {
        self.outcome(surface).is_some_and(RenderOutcome::is_pending)
    }

    /// The most recent request dispatched to `surface`, resolved or not.
    pub fn last_request(&self, surface: SurfaceKind) -> Option<&DiagramRequest> {
        self.slot(surface).request.as_ref()
    }

    /// Whether `description` should be (re-)rendered into `surface`.
    ///
    /// True when it differs from the last dispatched description, or when it is unchanged but
    /// the surface was emptied (fullscreen entry, external reset) and nothing is in flight.
    pub fn needs_render(&self, description: &str, surface: SurfaceKind) -> bool {
        if description.trim().is_empty() {
            return false;
        }
        let slot = self.slot(surface);
        match &slot.request {
            None => true,
            Some(req) if *req.description != *description => true,
            Some(_) => slot.outcome.is_none(),
        }
    }

    /// Dispatches only when [`RenderEngine::needs_render`] holds.
    pub fn sync(&mut self, description: &str, surface: SurfaceKind) -> Option<PendingRender> {
        if !self.needs_render(description, surface) {
            return None;
        }
        self.dispatch(description, surface)
    }

    /// Starts a render of `description` into `surface`, superseding anything in flight there.
    ///
    /// Blank descriptions are not rendered and leave the surface untouched.
    pub fn dispatch(&mut self, description: &str, surface: SurfaceKind) -> Option<PendingRender> {
        if description.trim().is_empty() {
            tracing::debug!(%surface, "skipping render of empty diagram description");
            return None;
        }

        let token = self.issue_token();
        let diagram_id = render_id(&self.id_prefix, &uuid::Uuid::new_v4());
        let request = DiagramRequest {
            description: Rc::from(description),
            target: surface,
            render_options: Rc::clone(&self.config),
        };

        {
            let slot = self.slot_mut(surface);
            let in_flight = slot.outcome.as_ref().is_some_and(RenderOutcome::is_pending);
            if let (true, Some(prev)) = (in_flight, slot.current) {
                tracing::debug!(%surface, superseded = %prev, "superseding in-flight render");
            }
            slot.current = Some(token);
            slot.request = Some(request.clone());
            slot.outcome = Some(RenderOutcome::pending(token));
        }

        self.ensure_compiler_initialized();

        tracing::debug!(%surface, %token, %diagram_id, "dispatching diagram render");
        let compiler = Rc::clone(&self.compiler);
        let future = match catch_unwind(AssertUnwindSafe(|| {
            compiler.render(&diagram_id, description)
        })) {
            Ok(fut) => fut,
            Err(payload) => future::ready(Err(CompileError::from_panic(payload))).boxed_local(),
        };

        Some(PendingRender {
            request,
            token,
            diagram_id,
            future,
        })
    }

    /// Re-dispatches the last description for `surface`, e.g. from a retry control.
    pub fn retry(&mut self, surface: SurfaceKind) -> Option<PendingRender> {
        let description = self.slot(surface).request.as_ref()?.description.clone();
        self.dispatch(&description, surface)
    }

    /// Empties `surface` and makes any in-flight result for it stale.
    ///
    /// The last description is kept, so a later [`RenderEngine::sync`] with the same text
    /// renders again.
    pub fn abandon(&mut self, surface: SurfaceKind) {
        let slot = self.slot_mut(surface);
        if let Some(token) = slot.current.take() {
            tracing::debug!(%surface, %token, "abandoning surface");
        }
        slot.outcome = None;
    }

    /// Installs a compiler completion if it still belongs to the current request, then runs the
    /// matching host callback.
    pub fn resolve(&mut self, completed: CompletedRender) -> Resolution {
        let (resolution, notification) = self.resolve_deferred(completed);
        if let Some(notification) = notification {
            notification.fire();
        }
        resolution
    }

    /// Like [`RenderEngine::resolve`], but hands the host callback back instead of running it.
    pub fn resolve_deferred(
        &mut self,
        completed: CompletedRender,
    ) -> (Resolution, Option<Notification>) {
        let CompletedRender {
            surface,
            token,
            diagram_id,
            result,
        } = completed;

        if self.slot(surface).current != Some(token) {
            tracing::debug!(%surface, %token, "dropping stale render result");
            return (Resolution::Stale, None);
        }

        match result {
            Ok(compiled) => {
                let sizing = surface.sizing();
                let visual = MountedVisual {
                    svg: apply_surface_sizing(&compiled.svg, sizing),
                    diagram_id,
                    sizing,
                };
                self.slot_mut(surface).outcome = Some(RenderOutcome {
                    request_id: token,
                    status: RenderStatus::Success,
                    visual: Some(visual),
                    error: None,
                });
                tracing::debug!(%surface, %token, "diagram rendered");
                let notification = self
                    .on_render
                    .as_ref()
                    .map(|callback| Notification(Notice::Rendered(Rc::clone(callback))));
                (Resolution::Rendered, notification)
            }
            Err(err) => {
                let info = ErrorInfo::from_compile_error(&err, Utc::now());
                tracing::warn!(
                    %surface,
                    %token,
                    category = ?info.category,
                    error = %err,
                    "diagram render failed"
                );
                self.slot_mut(surface).outcome = Some(RenderOutcome {
                    request_id: token,
                    status: RenderStatus::Failed,
                    visual: None,
                    error: Some(info.clone()),
                });
                let notification = self
                    .on_error
                    .as_ref()
                    .map(|callback| Notification(Notice::Failed(Rc::clone(callback), err)));
                (Resolution::Failed(info), notification)
            }
        }
    }
}
