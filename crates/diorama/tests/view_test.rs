use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::FixedOffset;
use diorama::geom::{point, vector};
use diorama::{
    CloseReason, CompileError, CompileResult, CompiledDiagram, CompletedRender, ConfigMap,
    DiagramCompiler, DiagramProps, DiagramView, InitOnce, InteractionMode, Key, PendingRender,
    PointerTarget, Presentation, Resolution, SurfaceKind, SurfaceView, ViewHandle, ViewMode,
    ViewTransform,
};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner, block_on};
use futures::future::LocalBoxFuture;
use serde_json::json;

const VALID: &str = "flowchart TD\nA-->B";
const UNBALANCED: &str = "flowchart TD\nA[Missing";

fn fresh_guard() -> &'static InitOnce {
    Box::leak(Box::new(InitOnce::new()))
}

fn svg_for(diagram_id: &str, description: &str) -> String {
    format!(r#"<svg id="{diagram_id}" viewBox="0 0 10 10"><desc>{description}</desc></svg>"#)
}

/// Every render waits for the test to complete it, in any order.
#[derive(Default)]
struct ScriptedCompiler {
    init_configs: RefCell<Vec<ConfigMap>>,
    calls: RefCell<Vec<(String, String)>>,
    senders: RefCell<Vec<Option<oneshot::Sender<CompileResult>>>>,
}

impl ScriptedCompiler {
    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    fn description(&self, call: usize) -> String {
        self.calls.borrow()[call].1.clone()
    }

    fn complete(&self, call: usize, result: CompileResult) {
        let sender = self.senders.borrow_mut()[call]
            .take()
            .expect("call completed once");
        // The receiver is gone when the view was dropped; that is fine.
        let _ = sender.send(result);
    }

    fn succeed(&self, call: usize) {
        let (id, description) = self.calls.borrow()[call].clone();
        self.complete(call, Ok(CompiledDiagram::new(svg_for(&id, &description))));
    }

    /// Fails with a bracket error when the description is unbalanced, otherwise succeeds.
    fn finish(&self, call: usize) {
        let description = self.description(call);
        if description.matches('[').count() == description.matches(']').count() {
            self.succeed(call);
        } else {
            self.complete(
                call,
                Err(CompileError::new(
                    "Syntax error in text: Parse error on line 2: Expecting 'SQE', got 'EOF'",
                )),
            );
        }
    }
}

impl DiagramCompiler for ScriptedCompiler {
    fn initialize(&self, config: &ConfigMap) {
        self.init_configs.borrow_mut().push(config.clone());
    }

    fn render(&self, diagram_id: &str, description: &str) -> LocalBoxFuture<'static, CompileResult> {
        let (tx, rx) = oneshot::channel();
        self.calls
            .borrow_mut()
            .push((diagram_id.to_string(), description.to_string()));
        self.senders.borrow_mut().push(Some(tx));
        async move {
            rx.await
                .unwrap_or_else(|_| Err(CompileError::new("compile cancelled")))
        }
        .boxed_local()
    }
}

#[derive(Default, Clone)]
struct Callbacks {
    renders: Rc<Cell<usize>>,
    errors: Rc<RefCell<Vec<String>>>,
}

impl Callbacks {
    fn props(&self, diagram: &str) -> DiagramProps {
        let renders = Rc::clone(&self.renders);
        let errors = Rc::clone(&self.errors);
        DiagramProps::new(diagram)
            .on_render(move || renders.set(renders.get() + 1))
            .on_error(move |err| errors.borrow_mut().push(err.message().to_string()))
    }
}

fn view_with(compiler: &Rc<ScriptedCompiler>, props: DiagramProps) -> DiagramView {
    let compiler: Rc<dyn DiagramCompiler> = compiler.clone();
    DiagramView::new(compiler, props).with_init_guard(fresh_guard())
}

/// Awaits a pending render after the test has completed its compiler call.
fn finish(view: &mut DiagramView, compiler: &ScriptedCompiler, pending: PendingRender) -> Resolution {
    let call = compiler.call_count() - 1;
    compiler.finish(call);
    view.resolve(block_on(pending.run()))
}

fn mounted_description(view: &DiagramView, surface: SurfaceKind) -> Option<String> {
    let visual = view.engine().visual(surface)?;
    let start = visual.svg.find("<desc>")? + "<desc>".len();
    let end = visual.svg.find("</desc>")?;
    Some(visual.svg[start..end].to_string())
}

fn open_interactive_overlay(view: &mut DiagramView, compiler: &ScriptedCompiler) {
    let pending = view.activate_inline().expect("fullscreen render dispatched");
    assert_eq!(finish(view, compiler, pending), Resolution::Rendered);
    assert!(view.is_interactive());
}

#[test]
fn valid_diagram_mounts_inline_and_reports_render() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(VALID));

    let pending = view.mount().expect("mount renders");
    assert_eq!(view.surface_view(SurfaceKind::Inline), SurfaceView::Loading);

    assert_eq!(finish(&mut view, &compiler, pending), Resolution::Rendered);
    assert_eq!(callbacks.renders.get(), 1);
    assert!(callbacks.errors.borrow().is_empty());
    match view.surface_view(SurfaceKind::Inline) {
        SurfaceView::Rendered(visual) => {
            assert!(visual.svg.contains("max-width: 100%; height: auto;"));
        }
        other => panic!("expected a rendered surface, got {other:?}"),
    }
    assert_eq!(view.surface_view(SurfaceKind::Fullscreen), SurfaceView::Empty);
    assert!(view.mount().is_none());
}

#[test]
fn malformed_diagram_shows_error_card_and_reports_once() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(UNBALANCED));

    let pending = view.mount().expect("mount renders");
    let resolution = finish(&mut view, &compiler, pending);
    assert!(matches!(resolution, Resolution::Failed(_)));
    assert_eq!(callbacks.renders.get(), 0);
    assert_eq!(
        *callbacks.errors.borrow(),
        vec!["Syntax error in text: Parse error on line 2: Expecting 'SQE', got 'EOF'".to_string()]
    );

    let utc = FixedOffset::east_opt(0).expect("offset");
    let card = view
        .error_card_in(SurfaceKind::Inline, &utc)
        .expect("error card");
    assert_eq!(card.message, "Invalid diagram syntax");
    assert_eq!(card.toggle_label, "Show details");
    assert!(card.details.is_none());

    assert_eq!(view.toggle_error_details(SurfaceKind::Inline), Some(true));
    let card = view
        .error_card_in(SurfaceKind::Inline, &utc)
        .expect("error card");
    let details = card.details.expect("expanded");
    assert!(details.technical_message.starts_with("Syntax error in text"));
    assert_eq!(details.timestamp.len(), "2024-05-01 12:30:00".len());

    // Unchanged failing input is not retried automatically.
    assert!(view.set_diagram(UNBALANCED).is_none());
}

#[test]
fn editing_the_description_replaces_the_error() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(UNBALANCED));

    let pending = view.mount().expect("mount renders");
    finish(&mut view, &compiler, pending);
    view.toggle_error_details(SurfaceKind::Inline);

    let pending = view.set_diagram("flowchart TD\nA[Fixed").expect("edit renders");
    // The old card stays up until the new compile resolves.
    assert!(view.error_panel(SurfaceKind::Inline).is_some());
    finish(&mut view, &compiler, pending);
    let panel = view.error_panel(SurfaceKind::Inline).expect("still failing");
    assert!(!panel.details_expanded(), "new errors start collapsed");

    let pending = view.set_diagram("flowchart TD\nA[Fixed]").expect("edit renders");
    assert_eq!(finish(&mut view, &compiler, pending), Resolution::Rendered);
    assert!(view.error_panel(SurfaceKind::Inline).is_none());
    assert_eq!(callbacks.errors.borrow().len(), 2);
    assert_eq!(callbacks.renders.get(), 1);
}

#[test]
fn latest_description_wins_when_results_arrive_out_of_order() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props("flowchart TD\nX-->Y1"));

    let first = view.mount().expect("first render");
    let second = view
        .set_diagram("flowchart TD\nX-->Y2")
        .expect("second render");

    compiler.succeed(1);
    assert_eq!(view.resolve(block_on(second.run())), Resolution::Rendered);
    compiler.succeed(0);
    assert_eq!(view.resolve(block_on(first.run())), Resolution::Stale);

    assert_eq!(
        mounted_description(&view, SurfaceKind::Inline).as_deref(),
        Some("flowchart TD\nX-->Y2")
    );
    assert_eq!(callbacks.renders.get(), 1);
}

#[test]
fn opening_fullscreen_always_renders_into_the_overlay() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(VALID));

    let pending = view.mount().expect("mount renders");
    finish(&mut view, &compiler, pending);

    let pending = view.activate_inline().expect("fullscreen render");
    assert_eq!(view.mode(), ViewMode::Fullscreen);
    assert_eq!(pending.surface(), SurfaceKind::Fullscreen);
    let overlay = view.overlay().expect("overlay open");
    assert_eq!(overlay.surface, SurfaceView::Loading);
    assert!(!overlay.interactive);

    finish(&mut view, &compiler, pending);
    let visual = view
        .engine()
        .visual(SurfaceKind::Fullscreen)
        .expect("fullscreen visual");
    assert!(visual.svg.contains("transform-origin: center;"));

    let calls_before_exit = compiler.call_count();
    assert!(view.close_fullscreen(CloseReason::CloseButton).is_none());
    assert_eq!(compiler.call_count(), calls_before_exit);
    assert!(view.overlay().is_none());

    // Same description, second visit: still a fresh compile.
    let pending = view.activate_inline().expect("fullscreen renders again");
    assert_eq!(compiler.call_count(), calls_before_exit + 1);
    finish(&mut view, &compiler, pending);
    assert_eq!(callbacks.renders.get(), 3);
}

#[test]
fn keyboard_opens_and_closes_the_overlay() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut view = view_with(&compiler, DiagramProps::new(VALID));

    assert!(view.handle_inline_key(Key::Other).is_none());
    assert!(view.handle_overlay_key(Key::Escape).is_none());

    let pending = view.handle_inline_key(Key::Space).expect("space opens");
    assert_eq!(view.mode(), ViewMode::Fullscreen);
    assert!(view.handle_inline_key(Key::Enter).is_none());
    drop(pending);

    view.handle_overlay_key(Key::Escape);
    assert_eq!(view.mode(), ViewMode::Inline);
}

#[test]
fn late_fullscreen_result_after_close_is_dropped() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(VALID));

    let inline = view.mount().expect("mount renders");
    finish(&mut view, &compiler, inline);

    let pending = view.activate_inline().expect("fullscreen render");
    view.close_fullscreen(CloseReason::OutsideDismiss);

    let call = compiler.call_count() - 1;
    compiler.succeed(call);
    let completed: CompletedRender = block_on(pending.run());
    assert_eq!(view.resolve(completed), Resolution::Stale);
    assert!(view.engine().visual(SurfaceKind::Fullscreen).is_none());
    assert_eq!(callbacks.renders.get(), 1);
}

#[test]
fn closing_fullscreen_renders_inline_when_the_description_changed() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut view = view_with(&compiler, DiagramProps::new(VALID));

    let inline = view.mount().expect("mount renders");
    finish(&mut view, &compiler, inline);
    open_interactive_overlay(&mut view, &compiler);

    let edit = view
        .set_diagram("flowchart TD\nA-->C")
        .expect("edit renders into the overlay");
    assert_eq!(edit.surface(), SurfaceKind::Fullscreen);
    finish(&mut view, &compiler, edit);

    let inline = view
        .close_fullscreen(CloseReason::CloseButton)
        .expect("inline catches up");
    assert_eq!(inline.surface(), SurfaceKind::Inline);
    finish(&mut view, &compiler, inline);
    assert_eq!(
        mounted_description(&view, SurfaceKind::Inline).as_deref(),
        Some("flowchart TD\nA-->C")
    );
}

#[test]
fn zooming_the_overlay_clamps_at_five() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut view = view_with(&compiler, DiagramProps::new(VALID));
    open_interactive_overlay(&mut view, &compiler);

    for _ in 0..50 {
        view.zoom_in();
    }
    let overlay = view.overlay().expect("overlay open");
    assert_eq!(overlay.zoom_label, "500%");
    assert_eq!(overlay.transform_css, "translate(0px, 0px) scale(5)");

    let wheel = view.wheel(-400.0);
    assert!(wheel.consumed);
    assert_eq!(view.viewport().transform().scale, 5.0);
}

#[test]
fn pan_then_reopen_starts_from_identity() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut view = view_with(&compiler, DiagramProps::new(VALID));
    open_interactive_overlay(&mut view, &compiler);

    assert_eq!(
        view.pointer_down(point(50.0, 50.0), PointerTarget::Graphic),
        Some(InteractionMode::Dragging)
    );
    view.pointer_move(point(90.0, 20.0)).expect("dragging");
    let released = view.pointer_up().expect("drag ended");
    assert_eq!(released.offset, vector(40.0, -30.0));
    view.zoom_in();

    view.close_fullscreen(CloseReason::CancelKey);
    let pending = view.activate_inline().expect("fullscreen renders");
    let state = view.viewport().snapshot();
    assert_eq!(state.scale, 1.0);
    assert_eq!(state.offset, vector(0.0, 0.0));
    finish(&mut view, &compiler, pending);
    assert_eq!(view.viewport().transform(), ViewTransform::IDENTITY);
}

#[test]
fn failed_overlay_is_inert_to_pan_and_zoom() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut view = view_with(&compiler, DiagramProps::new(UNBALANCED));

    let pending = view.activate_inline().expect("fullscreen render");
    finish(&mut view, &compiler, pending);
    let overlay = view.overlay().expect("overlay open");
    assert!(matches!(overlay.surface, SurfaceView::Failed(_)));
    assert!(!overlay.interactive);

    assert!(
        view.pointer_down(point(0.0, 0.0), PointerTarget::Graphic)
            .is_none()
    );
    assert!(view.pointer_move(point(10.0, 10.0)).is_none());
    assert!(!view.wheel(-200.0).consumed);
    assert!(view.zoom_in().is_none());
    assert!(view.reset_view().is_none());
    assert_eq!(view.viewport().transform(), ViewTransform::IDENTITY);
}

#[test]
fn retry_rerenders_only_the_visible_surface() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(VALID));

    let pending = view.mount().expect("mount renders");
    compiler.complete(0, Err(CompileError::new("renderer not ready")));
    let resolution = view.resolve(block_on(pending.run()));
    let Resolution::Failed(info) = resolution else {
        panic!("expected failure, got {resolution:?}");
    };
    assert_eq!(info.user_message, "Unable to render diagram");

    assert!(view.retry(SurfaceKind::Fullscreen).is_none());
    let pending = view.retry(SurfaceKind::Inline).expect("explicit retry");
    assert_eq!(finish(&mut view, &compiler, pending), Resolution::Rendered);
    assert!(view.error_panel(SurfaceKind::Inline).is_none());
    assert_eq!(callbacks.renders.get(), 1);
    assert_eq!(callbacks.errors.borrow().len(), 1);
}

#[test]
fn config_is_merged_and_initializes_once() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let guard = fresh_guard();
    let props = DiagramProps::new(VALID).with_config(ConfigMap::from_value(json!({
        "theme": "dark",
        "flowchart": { "padding": 30 }
    })));
    let dyn_compiler: Rc<dyn DiagramCompiler> = compiler.clone();
    let mut view = DiagramView::new(dyn_compiler, props).with_init_guard(guard);

    let pending = view.mount().expect("mount renders");
    finish(&mut view, &compiler, pending);
    let pending = view.activate_inline().expect("fullscreen render");
    finish(&mut view, &compiler, pending);

    let configs = compiler.init_configs.borrow();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].theme(), Some("dark"));
    assert_eq!(configs[0].get_f64("flowchart.padding"), Some(30.0));
    assert_eq!(configs[0].get_str("flowchart.curve"), Some("basis"));
    assert_eq!(configs[0].security_level(), Some("loose"));
    assert!(guard.is_initialized());
}

#[test]
fn presentation_passes_through_in_author_order() {
    let presentation = Presentation::default()
        .with_class_name("paper-figure")
        .with_style("margin", "0 auto")
        .with_style("border", "none");
    assert_eq!(presentation.style_attribute(), "margin: 0 auto; border: none;");

    let compiler = Rc::new(ScriptedCompiler::default());
    let view = view_with(
        &compiler,
        DiagramProps::new(VALID).with_presentation(presentation.clone()),
    );
    assert_eq!(view.presentation(), &presentation);
    assert_eq!(compiler.call_count(), 0);
}

#[test]
fn blank_description_never_reaches_the_compiler() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props("  \n "));

    assert!(view.mount().is_none());
    assert_eq!(view.surface_view(SurfaceKind::Inline), SurfaceView::Empty);
    assert!(compiler.init_configs.borrow().is_empty());
    assert_eq!(compiler.call_count(), 0);
    assert!(callbacks.errors.borrow().is_empty());
}

#[test]
fn handle_resolves_spawned_renders_in_request_order() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut pool = LocalPool::new();
    let handle = ViewHandle::new(
        view_with(&compiler, callbacks.props("flowchart TD\nX-->Y1")),
        pool.spawner(),
    );

    assert!(handle.mount().expect("spawn"));
    assert!(handle.set_diagram("flowchart TD\nX-->Y2").expect("spawn"));
    assert!(!handle.set_diagram("flowchart TD\nX-->Y2").expect("spawn"));
    pool.run_until_stalled();
    assert!(handle.view().borrow().engine().is_pending(SurfaceKind::Inline));

    compiler.succeed(1);
    pool.run_until_stalled();
    compiler.succeed(0);
    pool.run_until_stalled();

    let view = handle.view().borrow();
    assert_eq!(
        mounted_description(&view, SurfaceKind::Inline).as_deref(),
        Some("flowchart TD\nX-->Y2")
    );
    assert_eq!(callbacks.renders.get(), 1);
}

#[test]
fn handle_drives_the_fullscreen_round_trip() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut pool = LocalPool::new();
    let handle = ViewHandle::new(view_with(&compiler, DiagramProps::new(VALID)), pool.spawner());

    handle.mount().expect("spawn");
    compiler.succeed(0);
    pool.run_until_stalled();

    assert!(handle.handle_inline_key(Key::Enter).expect("spawn"));
    compiler.succeed(1);
    pool.run_until_stalled();
    assert!(handle.view().borrow().is_interactive());

    assert!(!handle.handle_overlay_key(Key::Escape).expect("spawn"));
    assert_eq!(handle.view().borrow().mode(), ViewMode::Inline);
    assert!(handle.view().borrow().engine().visual(SurfaceKind::Inline).is_some());
}

#[test]
fn dropping_the_view_leaves_in_flight_renders_harmless() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut pool = LocalPool::new();
    let handle = ViewHandle::new(view_with(&compiler, DiagramProps::new(VALID)), pool.spawner());

    handle.mount().expect("spawn");
    pool.run_until_stalled();
    drop(handle);

    compiler.succeed(0);
    pool.run_until_stalled();
    assert_eq!(compiler.call_count(), 1);
}

#[test]
fn render_callback_may_edit_the_diagram_through_the_handle() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let mut pool = LocalPool::new();
    let slot: Rc<RefCell<Option<ViewHandle<LocalSpawner>>>> = Rc::default();
    let edited = Rc::new(Cell::new(false));

    let props = {
        let slot = Rc::clone(&slot);
        let edited = Rc::clone(&edited);
        DiagramProps::new(VALID).on_render(move || {
            if edited.replace(true) {
                return;
            }
            if let Some(handle) = slot.borrow().as_ref() {
                assert!(handle.set_diagram("flowchart TD\nA-->Z").expect("spawn"));
            }
        })
    };
    let handle = ViewHandle::new(view_with(&compiler, props), pool.spawner());
    *slot.borrow_mut() = Some(handle.clone());

    handle.mount().expect("spawn");
    compiler.succeed(0);
    pool.run_until_stalled();

    assert!(edited.get());
    assert_eq!(compiler.call_count(), 2);
    assert_eq!(compiler.description(1), "flowchart TD\nA-->Z");
    assert!(handle.view().borrow().engine().is_pending(SurfaceKind::Inline));

    compiler.succeed(1);
    pool.run_until_stalled();
    assert_eq!(
        mounted_description(&handle.view().borrow(), SurfaceKind::Inline).as_deref(),
        Some("flowchart TD\nA-->Z")
    );

    slot.borrow_mut().take();
}

#[test]
fn resolve_deferred_hands_the_error_callback_back() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let callbacks = Callbacks::default();
    let mut view = view_with(&compiler, callbacks.props(UNBALANCED));

    let pending = view.mount().expect("mount renders");
    compiler.finish(0);
    let (resolution, notification) = view.resolve_deferred(block_on(pending.run()));

    assert!(matches!(resolution, Resolution::Failed(_)));
    assert!(view.error_panel(SurfaceKind::Inline).is_some());
    assert!(callbacks.errors.borrow().is_empty());

    notification.expect("error callback registered").fire();
    assert_eq!(callbacks.errors.borrow().len(), 1);
    assert!(callbacks.errors.borrow()[0].starts_with("Syntax error in text"));
}

#[test]
fn single_options_layer_over_the_engine_defaults() {
    let compiler = Rc::new(ScriptedCompiler::default());
    let props = DiagramProps::new(VALID)
        .with_option("flowchart.padding", json!(42))
        .and_then(|props| props.with_option("theme", json!("forest")))
        .expect("object config");
    let mut view = view_with(&compiler, props);

    let pending = view.mount().expect("mount renders");
    finish(&mut view, &compiler, pending);

    let configs = compiler.init_configs.borrow();
    assert_eq!(configs[0].theme(), Some("forest"));
    assert_eq!(configs[0].get_f64("flowchart.padding"), Some(42.0));
    assert_eq!(configs[0].get_str("flowchart.curve"), Some("basis"));

    let rejected = DiagramProps::new(VALID)
        .with_config(ConfigMap::from_value(json!("dark")))
        .with_option("theme", json!("forest"));
    assert!(matches!(
        rejected,
        Err(diorama::Error::ConfigNotObject { found: "a string" })
    ));
}
