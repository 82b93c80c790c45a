//! Terminal front end: the view controller, the ten views and the event
//! loop that feeds them keys, mouse events and background completions.

pub mod context;
pub mod controller;
pub mod editor_buffer;
pub mod event;
pub mod navigation;
pub mod screen;
pub mod task;
pub mod views;
mod widgets;

#[cfg(test)]
mod testing;

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::{
    self as terminal_event, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use dbrowse_core::config::ConnectionProfile;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::context::AppContext;
use crate::controller::ViewController;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::task::Task;
use crate::views::{all_screens, ConnectionView};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Everything the binary hands over to the UI.
#[derive(Debug)]
pub struct Launch {
    pub context: AppContext,
    /// Shown as a fatal error on the first frame, e.g. an unreadable config.
    pub startup_error: Option<String>,
    /// Profile to connect to immediately.
    pub auto_connect: Option<ConnectionProfile>,
}

pub fn run(launch: Launch) -> Result<(), TuiError> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("dbrowse-worker")
        .build()?;

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &runtime, launch);
    let restore_result = restore_terminal(&mut terminal);
    // In-flight driver calls may never return; do not wait for them.
    runtime.shutdown_background();

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs background tasks and posts their completions back to the loop.
#[derive(Debug, Clone)]
struct Spawner {
    handle: Handle,
    sender: UnboundedSender<Completion>,
}

impl Spawner {
    fn spawn_all(&self, tasks: Vec<Task>) {
        for task in tasks {
            let sender = self.sender.clone();
            self.handle.spawn(async move {
                let completion = task.run().await;
                if sender.send(completion).is_err() {
                    tracing::debug!("event loop closed, dropping completion");
                }
            });
        }
    }
}

/// Builds the controller, enters the first view and queues the startup
/// connect, if any.
fn boot(launch: Launch) -> (ViewController, AppContext, Vec<Task>) {
    let Launch {
        mut context,
        startup_error,
        auto_connect,
    } = launch;

    let mut connection = ConnectionView::new();
    let startup = auto_connect.map(|profile| connection.connect(profile, &context));
    let mut controller = ViewController::new(all_screens(connection), ViewMode::Connection);

    let mut tasks = controller.start(&mut context);
    if let Some(reaction) = startup {
        tasks.extend(controller.react(reaction, &mut context));
    }
    if let Some(message) = startup_error {
        controller.set_fatal(message);
    }
    (controller, context, tasks)
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    runtime: &Runtime,
    launch: Launch,
) -> Result<(), TuiError> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let spawner = Spawner {
        handle: runtime.handle().clone(),
        sender,
    };

    let (mut controller, mut context, tasks) = boot(launch);
    spawner.spawn_all(tasks);

    loop {
        while let Ok(completion) = receiver.try_recv() {
            spawner.spawn_all(controller.dispatch_completion(completion, &mut context));
        }
        if controller.should_quit() {
            break;
        }

        terminal.draw(|frame| controller.render(frame, &context))?;

        if terminal_event::poll(POLL_INTERVAL)? {
            let tasks = match terminal_event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    controller.dispatch_key(key, &mut context)
                }
                Event::Mouse(mouse) => controller.dispatch_mouse(mouse, &mut context),
                _ => Vec::new(),
            };
            spawner.spawn_all(tasks);
        }

        if controller.should_quit() {
            break;
        }
    }

    tracing::info!("event loop finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbrowse_core::config::ConnectionProfile;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    use super::{boot, Launch, Spawner};
    use crate::event::Completion;
    use crate::navigation::ViewMode;
    use crate::task::Task;
    use crate::testing::context;

    #[tokio::test]
    async fn spawned_tasks_report_back() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let spawner = Spawner {
            handle: Handle::current(),
            sender,
        };
        spawner.spawn_all(vec![Task::after(
            Duration::from_millis(1),
            Completion::StatusExpired(7),
        )]);

        let completion = receiver.recv().await.expect("completion");
        assert!(matches!(completion, Completion::StatusExpired(7)));
    }

    #[tokio::test]
    async fn startup_profile_connects_and_lands_in_the_browser() {
        let (ctx, _dir) = context();
        let (mut controller, mut ctx, mut tasks) = boot(Launch {
            context: ctx,
            startup_error: None,
            auto_connect: Some(ConnectionProfile::sqlite("local", "shop.db")),
        });
        assert_eq!(controller.mode(), ViewMode::Connection);
        assert_eq!(tasks.len(), 1);

        let completion = tasks.remove(0).run().await;
        let _ = controller.dispatch_completion(completion, &mut ctx);
        assert!(ctx.is_connected());
        assert_eq!(controller.mode(), ViewMode::Browser);
    }

    #[test]
    fn startup_error_is_fatal() {
        let (ctx, _dir) = context();
        let (controller, _ctx, tasks) = boot(Launch {
            context: ctx,
            startup_error: Some("config is unreadable".to_string()),
            auto_connect: None,
        });
        assert!(tasks.is_empty());
        assert_eq!(
            controller.fatal().map(|fatal| fatal.message.as_str()),
            Some("config is unreadable")
        );
    }
}
