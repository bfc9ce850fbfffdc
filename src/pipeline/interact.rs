//! Pseudo-random page interactions.
//!
//! Some trackers only fire after signs of life: mouse movement, hovers,
//! scrolling. Intensity scales the number of gestures. Every gesture is
//! best-effort; interaction failures never fail the task.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::Page;
use rand::Rng;
use tracing::debug;

/// How busy the synthetic user is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Light,
    Normal,
}

impl Intensity {
    fn mouse_moves(self) -> u32 {
        match self {
            Self::Light => 3,
            Self::Normal => 7,
        }
    }

    fn scrolls(self) -> u32 {
        match self {
            Self::Light => 1,
            Self::Normal => 3,
        }
    }
}

/// Drive mouse moves, a link hover, and scrolling over the page.
pub async fn perform_interactions(page: &Page, intensity: Intensity) {
    let mut rng = rand::rng();

    for _ in 0..intensity.mouse_moves() {
        let x = rng.random_range(40.0..1880.0);
        let y = rng.random_range(40.0..1040.0);
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build();
        match params {
            Ok(params) => {
                if let Err(e) = page.execute(params).await {
                    debug!("mouse move failed: {e}");
                    return;
                }
            }
            Err(e) => {
                debug!("mouse params build failed: {e}");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(rng.random_range(60..240))).await;
    }

    // hover the first visible link, if any
    let hover = r"
        (() => {
            const link = document.querySelector('a[href]');
            if (!link) { return null; }
            const rect = link.getBoundingClientRect();
            if (rect.width === 0 || rect.height === 0) { return null; }
            link.dispatchEvent(new MouseEvent('mouseover', { bubbles: true }));
            return rect.x + ',' + rect.y;
        })()
    ";
    if let Err(e) = page.evaluate(hover).await {
        debug!("hover failed: {e}");
    }

    for _ in 0..intensity.scrolls() {
        let dy = rng.random_range(200..900);
        let script = format!("window.scrollBy(0, {dy});");
        if let Err(e) = page.evaluate(script.as_str()).await {
            debug!("scroll failed: {e}");
            break;
        }
        tokio::time::sleep(Duration::from_millis(rng.random_range(150..450))).await;
    }
}
