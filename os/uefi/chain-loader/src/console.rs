//! # Console
//!
//! Text mode selection and single-key operator input.

use boot_chain::KeyPrompt;
use uefi::boot::{self, EventType, TimerTrigger, Tpl};
use uefi::proto::console::text::{Key, ScanCode};
use uefi::{ResultExt, system};

/// Switches to the text mode with the most characters and clears the screen.
///
/// Modes are weighted 16:10, between the common 4:3 and 16:9 ratios; the
/// later mode wins a tie.
///
/// # Errors
/// If switching the mode failed.
pub fn set_highest_available_text_mode() -> uefi::Result {
    system::with_stdout(|out| {
        let best = out
            .modes()
            .max_by_key(|mode| (16 * mode.rows()) * (10 * mode.columns()));

        let mut result = Ok(());
        if let Some(best) = best {
            let current = out.current_mode().ok().flatten().map(|mode| mode.index());
            if current != Some(best.index()) {
                result = out.set_mode(best);
            }
        }

        let _ = out.clear();
        let _ = out.enable_cursor(true);
        result
    })
}

/// Blocks until a key is pressed.
fn next_key() -> Key {
    loop {
        match system::with_stdin(|input| input.wait_for_key_event()) {
            Some(event) => {
                // Fails at raised TPL; poll instead.
                if boot::wait_for_event(&mut [event]).is_err() {
                    sleep(1);
                }
            }
            None => sleep(1),
        }

        if let Ok(Some(key)) = system::with_stdin(|input| input.read_key()) {
            return key;
        }
    }
}

/// Waits for a key press. Returns `false` for Escape.
pub fn wait_for_key() -> bool {
    !matches!(next_key(), Key::Special(ScanCode::ESCAPE))
}

/// Sleeps on a relative timer, or stalls the CPU if no timer is available.
pub fn sleep(milliseconds: u64) {
    if timer_sleep(milliseconds).is_err() {
        boot::stall(usize::try_from(milliseconds * 1000).unwrap_or(usize::MAX));
    }
}

fn timer_sleep(milliseconds: u64) -> uefi::Result {
    let event = unsafe { boot::create_event(EventType::TIMER, Tpl::CALLBACK, None, None)? };

    // Timer periods are in 100 ns units.
    let result = boot::set_timer(&event, TimerTrigger::Relative(milliseconds * 10_000)).and_then(|()| {
        let mut events = [unsafe { event.unsafe_clone() }];
        boot::wait_for_event(&mut events).discard_errdata().map(|_| ())
    });

    let _ = boot::close_event(event);
    result
}

/// Menu prompts on the firmware console.
pub struct ConsolePrompt;

impl KeyPrompt for ConsolePrompt {
    fn show(&mut self, text: &str) {
        uefi::print!("{text}");
    }

    fn read_choice(&mut self, accepted: &[char], default: char) -> char {
        let choice = loop {
            let Key::Printable(c) = next_key() else {
                continue;
            };
            let c = char::from(c);
            if c == '\r' || c == '\n' {
                break default;
            }
            if accepted.contains(&c) {
                break c;
            }
        };
        uefi::println!("{choice}\n");
        choice
    }
}
