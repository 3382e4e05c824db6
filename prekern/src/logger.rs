//! `log` backend that prints to the text console.

use core::fmt::Write;

use crate::console::{Color, Console, TextCells};

/// Prefix and colour of each level.
const fn style(level: log::Level) -> (&'static str, Color) {
	match level {
		log::Level::Error => ("[!]", Color::LightRed),
		log::Level::Warn => ("[!]", Color::Yellow),
		log::Level::Info => ("[+]", Color::LightGreen),
		log::Level::Debug | log::Level::Trace => ("[*]", Color::LightGray),
	}
}

/// A console behind a spinlock.
pub struct ConsoleLogger<B> {
	/// The console.
	console: spin::Mutex<Console<B>>,
}

impl<B> ConsoleLogger<B> {
	/// Wraps a cell buffer.
	pub const fn new(cells: B) -> Self {
		Self {
			console: spin::Mutex::new(Console::new(cells)),
		}
	}

	/// Releases the console lock without a guard.
	///
	/// # Safety
	/// Whoever held the lock must never run again (e.g. it was
	/// interrupted by a fatal trap, or it panicked).
	pub unsafe fn force_unlock(&self) {
		// SAFETY: Guaranteed by the caller.
		unsafe { self.console.force_unlock() }
	}
}

impl<B: TextCells> ConsoleLogger<B> {
	/// Blanks the screen.
	pub fn clear(&self) {
		self.console.lock().clear();
	}
}

impl<B: TextCells + Send> log::Log for ConsoleLogger<B> {
	fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &log::Record<'_>) {
		let (prefix, color) = style(record.level());
		let mut console = self.console.lock();
		// Printing to the console cannot fail.
		let _ = writeln!(console.colored(color), "{prefix} {}", record.args());
	}

	fn flush(&self) {}
}

/// The bare-metal logger on the legacy text buffer.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
static LOGGER: ConsoleLogger<crate::console::VgaText> = ConsoleLogger::new(
	// SAFETY: Low memory is identity mapped on entry and this is the only
	// SAFETY: `VgaText` ever created.
	unsafe { crate::console::VgaText::new() },
);

/// Clears the screen and installs the console logger.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn init() {
	LOGGER.clear();
	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(log::LevelFilter::Trace);
	}
}

/// Makes the console usable from a fatal path, whatever it interrupted.
///
/// # Safety
/// Must only be called on a path that never returns to the interrupted
/// code.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub unsafe fn take_over() {
	// SAFETY: Guaranteed by the caller.
	unsafe { LOGGER.force_unlock() }
}
