//! Generic classfile-specific definitions

/// Header of Java class file (magic number)
pub const MAGIC: u32 = 0xCAFEBABE;

/// Name of a constructor
pub const CONSTRUCTOR_METHOD_NAME: &str = "<init>";

/// JVM version constants
pub mod major_versions {
    pub const JAVA_1_1: u16 = 45;
    pub const JAVA_6_0: u16 = 50;
    pub const JAVA_7: u16 = 51;
    pub const JAVA_8: u16 = 52;
    pub const JAVA_25: u16 = 69;
}

/// Oldest major version the reader accepts
pub const MIN_SUPPORTED_MAJOR: u16 = major_versions::JAVA_1_1;

/// Newest major version the reader accepts
pub const MAX_SUPPORTED_MAJOR: u16 = major_versions::JAVA_25;

/// First major version whose verifier consumes StackMapTable frames
pub const FIRST_STACK_MAP_MAJOR: u16 = major_versions::JAVA_6_0;

/// Largest code array a method may carry
pub const MAX_CODE_LENGTH: usize = 65535;

/// Attribute names the patcher needs to recognise
pub mod attribute_names {
    pub const CODE: &str = "Code";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
}

/// Access flags used by the matcher and the frame recalculator
pub mod access_flags {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_NATIVE: u16 = 0x0100;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
}
