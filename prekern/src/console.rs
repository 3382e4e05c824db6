//! Scrolling 80x25 text console.
//!
//! Every cell is a `u16`: the character in the low byte and the colour
//! attribute in the high byte, as the legacy text-mode buffer expects.

use core::fmt;

/// Columns per row.
pub const WIDTH: usize = 80;
/// Rows on screen.
pub const HEIGHT: usize = 25;
/// Total cells.
pub const CELLS: usize = WIDTH * HEIGHT;

/// Text-mode foreground colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[expect(missing_docs)]
pub enum Color {
	Black      = 0,
	Blue       = 1,
	Green      = 2,
	Cyan       = 3,
	Red        = 4,
	Magenta    = 5,
	Brown      = 6,
	LightGray  = 7,
	DarkGray   = 8,
	LightBlue  = 9,
	LightGreen = 10,
	LightCyan  = 11,
	LightRed   = 12,
	Pink       = 13,
	Yellow     = 14,
	White      = 15,
}

impl Color {
	/// The cell for `byte` in this colour on black.
	#[inline]
	#[must_use]
	pub const fn cell(self, byte: u8) -> u16 {
		((self as u16) << 8) | byte as u16
	}
}

/// Backing storage for the console's cells.
pub trait TextCells {
	/// Reads cell `index` (row-major).
	fn read_cell(&self, index: usize) -> u16;

	/// Writes cell `index` (row-major).
	fn write_cell(&mut self, index: usize, cell: u16);
}

impl TextCells for [u16; CELLS] {
	#[inline]
	fn read_cell(&self, index: usize) -> u16 {
		self[index]
	}

	#[inline]
	fn write_cell(&mut self, index: usize, cell: u16) {
		self[index] = cell;
	}
}

/// The legacy VGA text buffer.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub struct VgaText(());

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl VgaText {
	/// Physical (and identity-mapped) base of the buffer.
	const BASE: usize = 0xB8000;

	/// Takes over the text buffer.
	///
	/// # Safety
	/// Low memory must be identity mapped, and only one `VgaText` may
	/// exist.
	#[must_use]
	pub const unsafe fn new() -> Self {
		Self(())
	}

	/// The address of cell `index`.
	#[inline]
	const fn cell_ptr(index: usize) -> *mut u16 {
		(Self::BASE as *mut u16).wrapping_add(index)
	}
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl TextCells for VgaText {
	#[inline]
	fn read_cell(&self, index: usize) -> u16 {
		debug_assert!(index < CELLS);
		// SAFETY: In bounds of the identity-mapped buffer, per `new()`.
		unsafe { Self::cell_ptr(index).read_volatile() }
	}

	#[inline]
	fn write_cell(&mut self, index: usize, cell: u16) {
		debug_assert!(index < CELLS);
		// SAFETY: In bounds of the identity-mapped buffer, per `new()`.
		unsafe { Self::cell_ptr(index).write_volatile(cell) }
	}
}

/// A cursor over a cell buffer.
pub struct Console<B> {
	/// Where the characters go.
	cells: B,
	/// Cursor row.
	row:   usize,
	/// Cursor column.
	col:   usize,
}

impl<B> Console<B> {
	/// A console with the cursor at the top left. The buffer is not
	/// cleared.
	pub const fn new(cells: B) -> Self {
		Self {
			cells,
			row: 0,
			col: 0,
		}
	}

	/// The backing buffer.
	pub fn cells(&self) -> &B {
		&self.cells
	}
}

impl<B: TextCells> Console<B> {
	/// Blanks the screen and homes the cursor.
	pub fn clear(&mut self) {
		for i in 0..CELLS {
			self.cells.write_cell(i, Color::LightGray.cell(b' '));
		}
		self.row = 0;
		self.col = 0;
	}

	/// Prints one byte. Newlines move to the next row; the screen scrolls
	/// when the cursor runs off the bottom.
	pub fn put(&mut self, byte: u8, color: Color) {
		match byte {
			b'\n' => self.newline(),
			b'\r' => self.col = 0,
			_ => {
				if self.col == WIDTH {
					self.newline();
				}
				self.cells
					.write_cell(self.row * WIDTH + self.col, color.cell(byte));
				self.col += 1;
			}
		}
	}

	/// Prints a string in one colour. Non-ASCII characters print as `?`.
	pub fn print(&mut self, s: &str, color: Color) {
		for c in s.chars() {
			self.put(if c.is_ascii() { c as u8 } else { b'?' }, color);
		}
	}

	/// A [`fmt::Write`] that prints in `color`.
	pub fn colored(&mut self, color: Color) -> Colored<'_, B> {
		Colored {
			console: self,
			color,
		}
	}

	/// Moves to the start of the next row.
	fn newline(&mut self) {
		self.col = 0;
		if self.row + 1 < HEIGHT {
			self.row += 1;
		} else {
			self.scroll();
		}
	}

	/// Moves every row up by one and blanks the last.
	fn scroll(&mut self) {
		for i in WIDTH..CELLS {
			let cell = self.cells.read_cell(i);
			self.cells.write_cell(i - WIDTH, cell);
		}
		for i in CELLS - WIDTH..CELLS {
			self.cells.write_cell(i, Color::LightGray.cell(b' '));
		}
	}
}

/// A console borrowed with a fixed colour.
pub struct Colored<'a, B> {
	/// The console.
	console: &'a mut Console<B>,
	/// Colour of everything written.
	color:   Color,
}

impl<B: TextCells> fmt::Write for Colored<'_, B> {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.console.print(s, self.color);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use core::fmt::Write;

	use super::*;

	fn console() -> Console<[u16; CELLS]> {
		let mut c = Console::new([0; CELLS]);
		c.clear();
		c
	}

	fn row_text(c: &Console<[u16; CELLS]>, row: usize) -> String {
		c.cells()[row * WIDTH..(row + 1) * WIDTH]
			.iter()
			.map(|&cell| char::from(cell as u8))
			.collect::<String>()
			.trim_end()
			.to_owned()
	}

	#[test]
	fn characters_carry_their_colour() {
		let mut c = console();
		c.print("ok", Color::Green);
		assert_eq!(c.cells()[0], 0x0200 | u16::from(b'o'));
		assert_eq!(c.cells()[1], 0x0200 | u16::from(b'k'));
		assert_eq!(c.cells()[2], Color::LightGray.cell(b' '));
	}

	#[test]
	fn newlines_and_wrapping() {
		let mut c = console();
		c.print("a\nb", Color::White);
		assert_eq!(row_text(&c, 0), "a");
		assert_eq!(row_text(&c, 1), "b");

		let mut c = console();
		c.print(&"x".repeat(WIDTH + 2), Color::White);
		assert_eq!(row_text(&c, 0).len(), WIDTH);
		assert_eq!(row_text(&c, 1), "xx");
	}

	#[test]
	fn scrolls_off_the_bottom() {
		let mut c = console();
		for i in 0..HEIGHT + 2 {
			writeln!(c.colored(Color::White), "line {i}").unwrap();
		}
		// Three lines scrolled away; the last newline left a blank row.
		assert_eq!(row_text(&c, 0), "line 3");
		assert_eq!(row_text(&c, HEIGHT - 2), format!("line {}", HEIGHT + 1));
		assert_eq!(row_text(&c, HEIGHT - 1), "");
	}

	#[test]
	fn non_ascii_is_replaced() {
		let mut c = console();
		c.print("é", Color::White);
		assert_eq!(row_text(&c, 0), "?");
	}
}
