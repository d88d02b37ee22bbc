//! Background dismissal of modal dialogs raised by the vault client.
//!
//! Vault add-ins inside the host pop up check-out and "get latest" prompts
//! that would otherwise block automation calls. The watcher polls for them on
//! its own thread and answers them negatively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use assemblybuilder_shared::{AssemblyBuilderError, Result};

/// Opaque OS window identifier.
pub type WindowId = u64;

/// A visible top-level window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
}

/// A button inside a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonInfo {
    pub id: WindowId,
    pub caption: String,
}

/// Window-level access used by the watcher. Shares no state with the run.
pub trait DialogDriver: Send + Sync {
    fn visible_windows(&self) -> Result<Vec<WindowInfo>>;

    fn buttons(&self, window: WindowId) -> Result<Vec<ButtonInfo>>;

    fn click(&self, button: WindowId) -> Result<()>;

    fn send_escape(&self, window: WindowId) -> Result<()>;
}

/// Which dialogs to dismiss and how.
#[derive(Debug, Clone)]
pub struct DialogRules {
    /// Title fragments, matched case-insensitively.
    pub titles: Vec<String>,
    /// Button captions in preference order, matched case-insensitively.
    pub dismiss_texts: Vec<String>,
    pub poll: Duration,
}

impl DialogRules {
    fn matches_title(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.titles
            .iter()
            .any(|fragment| title.contains(&fragment.to_lowercase()))
    }

    fn pick_button<'b>(&self, buttons: &'b [ButtonInfo]) -> Option<&'b ButtonInfo> {
        self.dismiss_texts.iter().find_map(|text| {
            let text = text.to_lowercase();
            buttons
                .iter()
                .find(|b| b.caption.replace('&', "").to_lowercase().contains(&text))
        })
    }
}

/// One polling pass: dismiss every matching dialog. Returns how many were handled.
pub fn sweep(driver: &dyn DialogDriver, rules: &DialogRules) -> Result<usize> {
    let mut handled = 0;
    for window in driver.visible_windows()? {
        if !rules.matches_title(&window.title) {
            continue;
        }
        let buttons = driver.buttons(window.id).unwrap_or_default();
        match rules.pick_button(&buttons) {
            Some(button) => {
                info!(title = %window.title, button = %button.caption, "dismissing dialog");
                driver.click(button.id)?;
            }
            None => {
                info!(title = %window.title, "dismissing dialog with escape");
                driver.send_escape(window.id)?;
            }
        }
        handled += 1;
    }
    Ok(handled)
}

/// Background dialog watcher. Stops and joins on [`stop`](Self::stop) or drop.
pub struct DialogWatcher {
    shutdown: Arc<AtomicBool>,
    dismissed: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl DialogWatcher {
    pub fn start(driver: Arc<dyn DialogDriver>, rules: DialogRules) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let dismissed = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&shutdown);
        let counter = Arc::clone(&dismissed);

        let handle = thread::Builder::new()
            .name("dialog-watcher".into())
            .spawn(move || {
                debug!("dialog watcher started");
                while !flag.load(Ordering::SeqCst) {
                    match sweep(driver.as_ref(), &rules) {
                        Ok(n) => {
                            counter.fetch_add(n, Ordering::SeqCst);
                        }
                        Err(e) => warn!(error = %e, "dialog sweep failed"),
                    }
                    park_for(&flag, rules.poll);
                }
                debug!("dialog watcher stopped");
            })
            .map_err(|e| AssemblyBuilderError::Worker(format!("dialog watcher: {e}")))?;

        Ok(Self {
            shutdown,
            dismissed,
            handle: Some(handle),
        })
    }

    /// Dialogs dismissed so far.
    pub fn dismissed(&self) -> usize {
        self.dismissed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("dialog watcher thread panicked");
            }
        }
    }
}

impl Drop for DialogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep up to `period`, waking early when `flag` is set and the thread unparked.
pub(crate) fn park_for(flag: &AtomicBool, period: Duration) {
    let deadline = std::time::Instant::now() + period;
    while !flag.load(Ordering::SeqCst) {
        let now = std::time::Instant::now();
        if now >= deadline {
            break;
        }
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeDesktop {
        windows: Mutex<Vec<(WindowInfo, Vec<ButtonInfo>)>>,
        clicked: Mutex<Vec<WindowId>>,
        escaped: Mutex<Vec<WindowId>>,
    }

    impl FakeDesktop {
        fn open(&self, id: WindowId, title: &str, buttons: &[(WindowId, &str)]) {
            self.windows.lock().unwrap().push((
                WindowInfo {
                    id,
                    title: title.into(),
                },
                buttons
                    .iter()
                    .map(|(id, caption)| ButtonInfo {
                        id: *id,
                        caption: (*caption).into(),
                    })
                    .collect(),
            ));
        }

        fn close_owner_of(&self, id: WindowId) {
            self.windows
                .lock()
                .unwrap()
                .retain(|(w, buttons)| w.id != id && buttons.iter().all(|b| b.id != id));
        }
    }

    impl DialogDriver for FakeDesktop {
        fn visible_windows(&self) -> Result<Vec<WindowInfo>> {
            Ok(self.windows.lock().unwrap().iter().map(|(w, _)| w.clone()).collect())
        }

        fn buttons(&self, window: WindowId) -> Result<Vec<ButtonInfo>> {
            Ok(self
                .windows
                .lock()
                .unwrap()
                .iter()
                .find(|(w, _)| w.id == window)
                .map(|(_, b)| b.clone())
                .unwrap_or_default())
        }

        fn click(&self, button: WindowId) -> Result<()> {
            self.clicked.lock().unwrap().push(button);
            self.close_owner_of(button);
            Ok(())
        }

        fn send_escape(&self, window: WindowId) -> Result<()> {
            self.escaped.lock().unwrap().push(window);
            self.close_owner_of(window);
            Ok(())
        }
    }

    fn rules() -> DialogRules {
        DialogRules {
            titles: vec!["Check Out".into(), "Get Latest Version".into()],
            dismiss_texts: vec!["No".into(), "Cancel".into()],
            poll: Duration::from_millis(5),
        }
    }

    #[test]
    fn sweep_prefers_dismiss_buttons_in_order() {
        let desktop = FakeDesktop::default();
        desktop.open(1, "SOLIDWORKS PDM - Check out", &[(11, "&Yes"), (12, "&No"), (13, "Cancel")]);
        desktop.open(2, "Notepad", &[(21, "No")]);

        assert_eq!(sweep(&desktop, &rules()).unwrap(), 1);
        assert_eq!(*desktop.clicked.lock().unwrap(), vec![12]);
        assert_eq!(desktop.visible_windows().unwrap().len(), 1);
    }

    #[test]
    fn sweep_falls_back_to_escape() {
        let desktop = FakeDesktop::default();
        desktop.open(3, "Get Latest Version", &[(31, "OK")]);

        assert_eq!(sweep(&desktop, &rules()).unwrap(), 1);
        assert_eq!(*desktop.escaped.lock().unwrap(), vec![3]);
    }

    #[test]
    fn watcher_runs_until_stopped() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.open(1, "Check Out", &[(11, "Cancel")]);

        let mut watcher = DialogWatcher::start(desktop.clone(), rules()).unwrap();
        for _ in 0..200 {
            if watcher.dismissed() > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(watcher.dismissed(), 1);
        assert!(watcher.is_running());

        watcher.stop();
        assert!(!watcher.is_running());
        watcher.stop();
    }
}
