// Default patch target: the chat message formatter of the game client

// Archive path of the class to rewrite
pub const DEFAULT_TARGET_CLASS_PATH: &str = "com/corrodinggames/rts/gameFramework/f/m.class";
pub const DEFAULT_TARGET_CLASS_NAME: &str = "com/corrodinggames/rts/gameFramework/f/m";
pub const DEFAULT_TARGET_METHOD_NAME: &str = "a";
pub const DEFAULT_TARGET_METHOD_DESCRIPTOR: &str =
    "(Ljava/lang/String;Ljava/lang/String;)Lcom/corrodinggames/rts/gameFramework/f/n;";
// Local slot of the second String argument (slot 0 is `this`)
pub const DEFAULT_HOOK_SLOT: u16 = 2;

pub const DEFAULT_HOOK_CLASS: &str = "org/example/GoogleTranslateHelper";
pub const DEFAULT_HOOK_METHOD: &str = "processMessage";
pub const DEFAULT_HOOK_DESCRIPTOR: &str = "(Ljava/lang/String;)Ljava/lang/String;";

// Hook classes appended to the output archive, in this order
pub const DEFAULT_EXTRA_ENTRIES: &[&str] = &[
    "org/example/GoogleTranslateHelper.class",
    "org/example/GoogleTranslateHelper$TranslationResult.class",
];

// Where the build puts the compiled hook classes
pub const DEFAULT_HOOK_CLASSES_DIR: &str = "build/classes/java/main";

// Deflate level for rewritten and appended entries (zip crate default)
pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;
