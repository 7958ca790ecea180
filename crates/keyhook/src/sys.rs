//! Windows low-level hook integration.
//!
//! `WH_KEYBOARD_LL`/`WH_MOUSE_LL` hooks must live on a thread that pumps a
//! message loop, and the swallow decision is made by returning a nonzero
//! `LRESULT` instead of calling `CallNextHookEx`. Injected events are
//! filtered before classification: either the OS `LLKHF_INJECTED` flag or
//! our own [`injectmark::KDRV_MARK`] in `dwExtraInfo` marks them.

use std::{
    sync::OnceLock,
    thread::{self, JoinHandle},
};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use windows::Win32::{
    Foundation::{LPARAM, LRESULT, WPARAM},
    System::Threading::GetCurrentThreadId,
    UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, HHOOK, KBDLLHOOKSTRUCT, LLKHF_INJECTED,
        LLMHF_INJECTED, MSG, MSLLHOOKSTRUCT, PostThreadMessageW, SetWindowsHookExW,
        TranslateMessage, UnhookWindowsHookEx, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_KEYDOWN, WM_KEYUP,
        WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_QUIT, WM_RBUTTONDOWN,
        WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP,
    },
};

use keyspec::Key;

use crate::{Error, KeyEdge, Manager, RawEvent, Result};

/// Manager consulted by the hook procedures. The procs are extern "system"
/// callbacks, so the handle rides in a static.
static MANAGER: OnceLock<Mutex<Option<Manager>>> = OnceLock::new();

fn manager_slot() -> &'static Mutex<Option<Manager>> {
    MANAGER.get_or_init(|| Mutex::new(None))
}

/// Running hook thread. Dropping stops the message loop and joins.
pub struct HookBackend {
    thread: Option<JoinHandle<()>>,
    thread_id: u32,
}

impl HookBackend {
    /// Install both low-level hooks on a dedicated message-loop thread.
    pub fn start(manager: Manager) -> Result<Self> {
        *manager_slot().lock() = Some(manager);

        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let thread = thread::Builder::new()
            .name("keyhook".into())
            .spawn(move || {
                let kb = match unsafe {
                    SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0)
                } {
                    Ok(h) => h,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Install(e.message())));
                        return;
                    }
                };
                let mouse = match unsafe {
                    SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), None, 0)
                } {
                    Ok(h) => h,
                    Err(e) => {
                        unsafe {
                            let _ = UnhookWindowsHookEx(kb);
                        }
                        let _ = ready_tx.send(Err(Error::Install(e.message())));
                        return;
                    }
                };

                let tid = unsafe { GetCurrentThreadId() };
                let _ = ready_tx.send(Ok(tid));
                debug!("hook_thread_started");

                run_message_loop();

                unhook(kb, mouse);
                debug!("hook_thread_exited");
            })
            .map_err(|_| Error::ThreadStart)?;

        let thread_id = match ready_rx.recv() {
            Ok(Ok(tid)) => tid,
            Ok(Err(e)) => {
                let _ = thread.join();
                *manager_slot().lock() = None;
                return Err(e);
            }
            Err(_) => {
                *manager_slot().lock() = None;
                return Err(Error::ThreadStart);
            }
        };

        Ok(Self {
            thread: Some(thread),
            thread_id,
        })
    }

    /// Stop the message loop and join the hook thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            unsafe {
                if PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)).is_err() {
                    warn!("post_quit_to_hook_thread_failed");
                }
            }
            let _ = thread.join();
            *manager_slot().lock() = None;
        }
    }
}

impl Drop for HookBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_message_loop() {
    let mut msg = MSG::default();
    loop {
        let got = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        if got.0 <= 0 {
            break;
        }
        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

fn unhook(kb: HHOOK, mouse: HHOOK) {
    unsafe {
        if UnhookWindowsHookEx(kb).is_err() {
            warn!("unhook_keyboard_failed");
        }
        if UnhookWindowsHookEx(mouse).is_err() {
            warn!("unhook_mouse_failed");
        }
    }
}

fn dispatch(raw: RawEvent) -> bool {
    let guard = manager_slot().lock();
    match guard.as_ref() {
        Some(manager) => manager.process(raw),
        None => false,
    }
}

unsafe extern "system" fn keyboard_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code >= 0 {
        let kb = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };
        let edge = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(KeyEdge::Down),
            WM_KEYUP | WM_SYSKEYUP => Some(KeyEdge::Up),
            _ => None,
        };
        if let (Some(edge), Some(key)) = (edge, Key::from_vk(kb.vkCode)) {
            let injected = kb.flags.0 & LLKHF_INJECTED.0 != 0
                || kb.dwExtraInfo == injectmark::KDRV_MARK;
            trace!(%key, ?edge, injected, "ll_keyboard_event");
            if dispatch(RawEvent {
                key,
                edge,
                injected,
            }) {
                return LRESULT(1);
            }
        }
    }
    unsafe { CallNextHookEx(None, n_code, w_param, l_param) }
}

unsafe extern "system" fn mouse_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code >= 0 {
        let ms = unsafe { &*(l_param.0 as *const MSLLHOOKSTRUCT) };
        let (key, edge) = match w_param.0 as u32 {
            WM_LBUTTONDOWN => (Some(Key::LButton), KeyEdge::Down),
            WM_LBUTTONUP => (Some(Key::LButton), KeyEdge::Up),
            WM_RBUTTONDOWN => (Some(Key::RButton), KeyEdge::Down),
            WM_RBUTTONUP => (Some(Key::RButton), KeyEdge::Up),
            WM_MBUTTONDOWN => (Some(Key::MButton), KeyEdge::Down),
            WM_MBUTTONUP => (Some(Key::MButton), KeyEdge::Up),
            _ => (None, KeyEdge::Down),
        };
        if let Some(key) = key {
            let injected =
                ms.flags & LLMHF_INJECTED != 0 || ms.dwExtraInfo == injectmark::KDRV_MARK;
            trace!(%key, ?edge, injected, "ll_mouse_event");
            if dispatch(RawEvent {
                key,
                edge,
                injected,
            }) {
                return LRESULT(1);
            }
        }
    }
    unsafe { CallNextHookEx(None, n_code, w_param, l_param) }
}
