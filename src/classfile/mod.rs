//! JVM classfile model
//!
//! Parsing, in-memory representation and serialization of `.class` files,
//! plus the instruction and stack-map codecs the patcher works with.
//!
//! - **constpool**: constants, lookup and interning
//! - **class / attribute**: `ClassFile`, members and the attributes that get rewritten
//! - **reader / writer**: bytes in, bytes out
//! - **instruction / frame**: `Code` array and `StackMapTable` codecs

pub mod attribute;
pub mod class;
pub mod constpool;
pub mod defs;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod instruction;
pub mod opcodes;
pub mod reader;
pub mod writer;

pub use attribute::{AttributeInfo, CodeAttribute, ExceptionTableEntry};
pub use class::{ClassFile, MemberInfo};
pub use constpool::{Constant, ConstantPool};
pub use descriptor::{FieldType, MethodDescriptor, ReturnType};
pub use error::{ClassError, ClassResult};
pub use reader::parse_class;
pub use writer::{class_file_to_bytes, ClassfileWritable};
