use std::fs;
use std::io::Cursor;

use arckit::Result;
use arckit::formats::romfs::RomFs;
use arckit::formats::u8::U8;

fn main() -> Result<()> {
    let data = fs::read("banner.arc")?;
    let mut cursor = Cursor::new(&data);
    let archive = U8::parse(&mut cursor)?;

    for (path, file) in archive.tree.walk_files() {
        println!("{path}: {} bytes", archive.tree.file(file).range.len);
    }

    // Repack the same tree as a RomFS level-3 region with its hash tree.
    let (region, hashes) = RomFs::build_with_ivfc(&archive.tree, &mut Cursor::new(&data))?;
    RomFs::verify(&region, &hashes)?;
    println!(
        "romfs region: {} bytes, master hash {:02x?}",
        region.len(),
        &hashes.master.data[..8]
    );
    fs::write("banner.romfs", region)?;

    Ok(())
}
