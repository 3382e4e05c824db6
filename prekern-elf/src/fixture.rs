//! Maps a built object at fixed addresses, the way the loader would at
//! random ones.

use prekern_arch::{
	Protection,
	paging::{PAGE_SIZE, round_up},
};
use prekern_mm::AddressSpace;
use prekern_test::{BuiltElf, KERNEL_PA, ScriptedCpu, SimMachine, boot_environment};

use crate::{ElfError, ElfImage, Segment, SegmentClass, head_size};

pub const HEAD_VA: u64 = 0xFFFF_FFFF_4000_0000;
pub const BOOT_VA: u64 = 0xFFFF_FFFF_C000_0000;

pub type Space = AddressSpace<SimMachine, ScriptedCpu>;

pub struct Loaded {
	pub space: Space,
	pub image: ElfImage,
}

pub const fn segment_va(class: SegmentClass) -> u64 {
	match class {
		SegmentClass::Text => 0xFFFF_FFFF_8000_0000,
		SegmentClass::Rodata => 0xFFFF_FFFF_8800_0000,
		SegmentClass::Data => 0xFFFF_FFFF_9000_0000,
	}
}

pub fn map_head(elf: &BuiltElf) -> Result<(Space, ElfImage, u64), ElfError> {
	let (sim, handoff) = boot_environment(&elf.bytes, None);
	let mut space = AddressSpace::new(sim, ScriptedCpu::new(), handoff.first_avail, handoff.scratch_va);

	let image_size = elf.bytes.len() as u64;
	let size = head_size(space.mem(), KERNEL_PA, image_size)?;
	space.ensure_mapped(HEAD_VA, HEAD_VA + size);
	space
		.enter_range(KERNEL_PA, HEAD_VA, size, Protection::ReadWrite)
		.unwrap();

	let image = ElfImage::new(space.mem(), HEAD_VA, KERNEL_PA, image_size)?;
	Ok((space, image, size))
}

pub fn map_segment(
	space: &mut Space,
	image: &ElfImage,
	class: SegmentClass,
	seg: Segment,
) -> Result<u64, ElfError> {
	let va = segment_va(class);
	space.ensure_mapped(va, va + seg.size);
	space
		.enter_range(seg.pa, va, seg.size, Protection::ReadWrite)
		.unwrap();
	image.assign_segment(space.mem_mut(), class, seg, va)?;
	Ok(va)
}

pub fn load(elf: &BuiltElf) -> Result<Loaded, ElfError> {
	let (mut space, mut image, head) = map_head(elf)?;

	let mut boot_pa = KERNEL_PA + head;
	for class in SegmentClass::ALL {
		if let Some(seg) = image.segment(space.mem(), class)? {
			map_segment(&mut space, &image, class, seg)?;
			boot_pa = boot_pa.max(seg.pa + seg.size);
		}
	}

	let boot_size = round_up(KERNEL_PA + elf.bytes.len() as u64, PAGE_SIZE) - boot_pa;
	space.ensure_mapped(BOOT_VA, BOOT_VA + boot_size);
	space
		.enter_range(boot_pa, BOOT_VA, boot_size, Protection::ReadWrite)
		.unwrap();
	image.build_boot(space.mem_mut(), BOOT_VA, boot_pa, boot_size)?;

	Ok(Loaded { space, image })
}

pub fn rebased(elf: &BuiltElf) -> Result<Loaded, ElfError> {
	let mut loaded = load(elf)?;
	loaded.image.rebase_symbols(loaded.space.mem_mut())?;
	Ok(loaded)
}
