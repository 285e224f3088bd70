use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// process-wide cancellation flag, written by the signal handler and by
/// strict-mode escalation, read at every suspension point
static STOP: AtomicBool = AtomicBool::new(false);

pub fn requested() -> bool {
    STOP.load(Ordering::Relaxed)
}

pub fn request() {
    STOP.store(true, Ordering::Relaxed);
}

pub fn clear() {
    STOP.store(false, Ordering::Relaxed);
}

extern "C" fn handle(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

/// Install SIGINT/SIGTERM handlers and block both signals outside of
/// `ppoll`. The poll call runs with an all-signals-unblocked mask, so
/// delivery happens only at suspension points and the flag is observed on
/// the very next iteration.
pub fn install() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);

        let mut block: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut block);
        libc::sigaddset(&mut block, libc::SIGINT);
        libc::sigaddset(&mut block, libc::SIGTERM);
        libc::sigprocmask(libc::SIG_BLOCK, &block, std::ptr::null_mut());

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handle as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}
