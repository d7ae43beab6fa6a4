//! Executors that rewrite a request and delegate to the executor they wrap.
//!
//! Wrappers compose freely: `Tmux<Docker<PlatformStandalone>>` pops interactive tools up
//! in a tmux pane while the target runs inside a container.

mod cmd;
mod docker;
mod prefixed;
mod tmux;
mod trampoline;

pub use cmd::Cmd;
pub use docker::Docker;
pub use prefixed::Prefixed;
pub use tmux::Tmux;
pub use trampoline::Trampoline;

use tether_core::SpawnRequest;

/// Run an interactive, unredirected request through `launcher` (a terminal pop-up command)
/// instead of on the controller's own terminal. The pop-up returns immediately, so the
/// wrapped request is waited for rather than terminated.
fn pop_up<'a>(mut request: SpawnRequest<'a>, launcher: &[String]) -> SpawnRequest<'a> {
    if request.interactive && request.redirect.is_none() {
        let mut command = launcher.to_vec();
        command.append(&mut request.command);
        request.command = command;
        request.interactive = false;
        request.wait = true;
    }
    request
}
