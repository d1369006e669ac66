//! Browser driver: advances a controller from `setTimeout` ticks.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::{AnimationController, ControllerError, Lifecycle};

/// Resolve after `ms` milliseconds of browser time.
///
/// Falls back to resolving immediately when no window is available
/// (e.g. inside a worker).
pub async fn sleep_ms(ms: i32) {
    let promise = js_sys::Promise::new(&mut |resolve, _| {
        if let Some(window) = web_sys::window() {
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms);
        } else {
            let _ = resolve.call0(&wasm_bindgen::JsValue::NULL);
        }
    });
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}

fn performance_now() -> Option<f64> {
    web_sys::window()?.performance().map(|p| p.now())
}

/// Drive `controller` in real time until it is torn down or dropped.
///
/// Mounts the controller if it is still idle, then wakes every `frame_ms`
/// and advances it by the measured elapsed time. The loop only keeps a weak
/// handle: unmount the controller or drop every other `Rc` to it (e.g. from
/// the page's teardown) to end the loop.
///
/// ## Example
///
/// ```rust,ignore
/// let controller = Rc::new(RefCell::new(AnimationController::new(scenes::model_split())));
/// wasm_bindgen_futures::spawn_local({
///     let controller = Rc::clone(&controller);
///     async move {
///         let _ = parallel_anim_core::web::drive(controller, 16).await;
///     }
/// });
/// // Reset button handler:
/// controller.borrow_mut().reset()?;
/// ```
pub async fn drive(
    controller: Rc<RefCell<AnimationController>>,
    frame_ms: i32,
) -> Result<(), ControllerError> {
    if controller.borrow().lifecycle() == Lifecycle::Idle {
        controller.borrow_mut().mount()?;
    }
    let controller = Rc::downgrade(&controller);

    let frame = f64::from(frame_ms.max(1));
    let mut last = performance_now().unwrap_or(0.0);
    loop {
        sleep_ms(frame_ms).await;

        let now = performance_now().unwrap_or(last + frame);
        // Whole milliseconds only; the remainder carries into the next tick.
        let elapsed = (now - last).max(0.0).floor();
        last += elapsed;
        if !tick(&controller, elapsed as u64)? {
            return Ok(());
        }
    }
}

/// Advance a weakly held controller. Returns `false` once it is gone or torn
/// down.
fn tick(
    controller: &Weak<RefCell<AnimationController>>,
    elapsed_ms: u64,
) -> Result<bool, ControllerError> {
    let Some(controller) = controller.upgrade() else {
        return Ok(false);
    };
    let mut controller = controller.borrow_mut();
    if controller.lifecycle() == Lifecycle::TornDown {
        return Ok(false);
    }
    controller.advance(elapsed_ms)?;
    Ok(true)
}
