// Common test utilities
#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use jarhook::classfile::attribute::CodeAttribute;
use jarhook::classfile::class::ClassFile;
use jarhook::classfile::class_file_to_bytes;
use jarhook::classfile::instruction::{decode, Instruction};
use jarhook::classfile::reader::parse_class;
use jarhook::patch::{HookMethod, PatchSpec, TargetMethod};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spec patching `class.method(descriptor)` at `slot` with the String hook
/// `org/x/H.process`
pub fn string_hook_spec(class: &str, method: &str, descriptor: &str, slot: u16) -> PatchSpec {
    hook_spec(class, method, descriptor, slot, "(Ljava/lang/String;)Ljava/lang/String;")
}

pub fn hook_spec(class: &str, method: &str, descriptor: &str, slot: u16, hook_descriptor: &str) -> PatchSpec {
    PatchSpec {
        target_class_path: format!("{}.class", class),
        target_class_name: class.to_string(),
        target_method: TargetMethod {
            name: method.to_string(),
            descriptor: descriptor.parse().expect("target descriptor"),
        },
        slot,
        hook: HookMethod {
            class: "org/x/H".to_string(),
            name: "process".to_string(),
            descriptor: hook_descriptor.parse().expect("hook descriptor"),
            is_interface: false,
        },
        extra_entry_paths: Vec::new(),
    }
}

/// A class with a single method; `build` adds constants and returns the body
pub fn class_with_method(
    major: u16,
    class: &str,
    access: u16,
    method: &str,
    descriptor: &str,
    build: impl FnOnce(&mut ClassFile) -> CodeAttribute,
) -> Vec<u8> {
    let mut class_file = ClassFile::new(major, class, Some("java/lang/Object")).expect("class");
    let code = build(&mut class_file);
    class_file.add_method(access, method, descriptor, Some(&code)).expect("method");
    class_file_to_bytes(&class_file)
}

/// `a/B.m(String, String) -> a/N` returning a fresh `N` built from both
/// arguments, the shape of the chat formatter the default spec targets
pub fn message_class(major: u16, class: &str, method: &str) -> Vec<u8> {
    class_with_method(
        major,
        class,
        ACC_PUBLIC,
        method,
        "(Ljava/lang/String;Ljava/lang/String;)La/N;",
        |cf| {
            let make = cf
                .constant_pool
                .intern_method_ref("a/N", "of", "(Ljava/lang/String;Ljava/lang/String;)La/N;")
                .expect("methodref");
            let [hi, lo] = make.to_be_bytes();
            // aload_1, aload_2, invokestatic a/N.of, areturn
            CodeAttribute::new(2, 3, vec![0x2b, 0x2c, 0xb8, hi, lo, 0xb0])
        },
    )
}

/// Decoded body of `method` in `class_bytes`
pub fn method_instructions(class_bytes: &[u8], method: &str) -> (ClassFile, CodeAttribute, Vec<Instruction>) {
    let class = parse_class(class_bytes).expect("parse class");
    let index = class
        .methods
        .iter()
        .position(|m| class.member_name(m).expect("name") == method)
        .expect("method present");
    let code = class.method_code(index).expect("code").expect("has code");
    let instructions = decode(&code.code).expect("decode").instructions;
    (class, code, instructions)
}

pub struct JarEntry<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
    pub compression: CompressionMethod,
}

pub fn entry<'a>(path: &'a str, data: &'a [u8], compression: CompressionMethod) -> JarEntry<'a> {
    JarEntry { path, data, compression }
}

/// Modification time of every entry written by [`write_jar`]
pub fn entry_time() -> DateTime {
    DateTime::from_date_and_time(2021, 6, 15, 10, 30, 0).expect("valid date")
}

/// Write a ZIP with the given entries; paths ending in `/` become directories
pub fn write_jar(path: &Path, entries: &[JarEntry<'_>]) {
    let file = File::create(path).expect("create jar");
    let mut writer = ZipWriter::new(file);
    for e in entries {
        let options = SimpleFileOptions::default()
            .compression_method(e.compression)
            .last_modified_time(entry_time());
        if e.path.ends_with('/') {
            writer.add_directory(e.path, options).expect("add directory");
        } else {
            writer.start_file(e.path, options).expect("start file");
            writer.write_all(e.data).expect("write entry");
        }
    }
    writer.finish().expect("finish jar");
}

/// Raw (still compressed) view of an archive entry
#[derive(Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub compression: CompressionMethod,
    pub crc32: u32,
    pub compressed: Vec<u8>,
}

pub fn raw_entries(path: &Path) -> Vec<RawEntry> {
    let mut archive = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index_raw(i).expect("raw entry");
            let mut compressed = Vec::new();
            file.read_to_end(&mut compressed).expect("read raw entry");
            RawEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                crc32: file.crc32(),
                compressed,
            }
        })
        .collect()
}

/// Decompressed bytes of entry `name`
pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
    let mut file = archive.by_name(name).expect("entry present");
    let mut data = Vec::new();
    file.read_to_end(&mut data).expect("read entry");
    data
}

/// Modification time recorded for entry `name`
pub fn entry_modified(path: &Path, name: &str) -> Option<DateTime> {
    let mut archive = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
    let file = archive.by_name(name).expect("entry present");
    file.last_modified()
}
