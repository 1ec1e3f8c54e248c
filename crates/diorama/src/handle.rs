use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};

use diorama_core::{PendingRender, SurfaceKind};

use crate::view::DiagramView;
use crate::viewport::{CloseReason, Key};

/// Drives a [`DiagramView`] on a single-threaded executor.
///
/// Each compile started through the handle is spawned on `spawner` and resolved back into the
/// shared view when it finishes. The spawned task only holds a weak reference, so dropping
/// every handle and view clone lets in-flight results fall on the floor.
///
/// `on_render`/`on_error` callbacks run after the view's borrow is released, so they may
/// drive the view again through a clone of the handle.
pub struct ViewHandle<S> {
    view: Rc<RefCell<DiagramView>>,
    spawner: S,
}

impl<S: Clone> Clone for ViewHandle<S> {
    fn clone(&self) -> Self {
        Self {
            view: Rc::clone(&self.view),
            spawner: self.spawner.clone(),
        }
    }
}

impl<S: LocalSpawn> ViewHandle<S> {
    pub fn new(view: DiagramView, spawner: S) -> Self {
        Self {
            view: Rc::new(RefCell::new(view)),
            spawner,
        }
    }

    pub fn view(&self) -> &Rc<RefCell<DiagramView>> {
        &self.view
    }

    /// Runs `f` against the view and spawns the compile it started, if any.
    ///
    /// Returns whether a compile was spawned.
    pub fn update(
        &self,
        f: impl FnOnce(&mut DiagramView) -> Option<PendingRender>,
    ) -> Result<bool, SpawnError> {
        let pending = f(&mut *self.view.borrow_mut());
        match pending {
            Some(pending) => self.spawn(pending).map(|()| true),
            None => Ok(false),
        }
    }

    fn spawn(&self, pending: PendingRender) -> Result<(), SpawnError> {
        let view: Weak<RefCell<DiagramView>> = Rc::downgrade(&self.view);
        tracing::trace!(surface = %pending.surface(), token = %pending.token(), "spawning render");
        self.spawner.spawn_local(async move {
            let completed = pending.run().await;
            match view.upgrade() {
                Some(view) => {
                    let (_, notification) = view.borrow_mut().resolve_deferred(completed);
                    if let Some(notification) = notification {
                        notification.fire();
                    }
                }
                None => tracing::debug!("view dropped before render completed"),
            }
        })
    }

    pub fn mount(&self) -> Result<bool, SpawnError> {
        self.update(DiagramView::mount)
    }

    pub fn set_diagram(&self, diagram: impl Into<String>) -> Result<bool, SpawnError> {
        let diagram = diagram.into();
        self.update(move |view| view.set_diagram(diagram))
    }

    pub fn activate_inline(&self) -> Result<bool, SpawnError> {
        self.update(DiagramView::activate_inline)
    }

    pub fn handle_inline_key(&self, key: Key) -> Result<bool, SpawnError> {
        self.update(|view| view.handle_inline_key(key))
    }

    pub fn close_fullscreen(&self, reason: CloseReason) -> Result<bool, SpawnError> {
        self.update(|view| view.close_fullscreen(reason))
    }

    pub fn handle_overlay_key(&self, key: Key) -> Result<bool, SpawnError> {
        self.update(|view| view.handle_overlay_key(key))
    }

    pub fn retry(&self, surface: SurfaceKind) -> Result<bool, SpawnError> {
        self.update(|view| view.retry(surface))
    }
}
