//! Numeric codes used on the wire.

pub mod command_set {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const REFERENCE_TYPE: u8 = 2;
    pub const CLASS_TYPE: u8 = 3;
    pub const METHOD: u8 = 6;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const STRING_REFERENCE: u8 = 10;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const THREAD_GROUP_REFERENCE: u8 = 12;
    pub const ARRAY_REFERENCE: u8 = 13;
    pub const EVENT_REQUEST: u8 = 15;
    pub const STACK_FRAME: u8 = 16;
    pub const EVENT: u8 = 64;
    /// Vendor command set shared between the agent and the debug proxy.
    pub const SQUAWK_VM: u8 = 128;
}

pub mod command {
    pub mod vm {
        pub const CLASSES_BY_SIGNATURE: u8 = 2;
        pub const ALL_CLASSES: u8 = 3;
        pub const ALL_THREADS: u8 = 4;
        pub const DISPOSE: u8 = 6;
        pub const ID_SIZES: u8 = 7;
        pub const SUSPEND: u8 = 8;
        pub const RESUME: u8 = 9;
        pub const EXIT: u8 = 10;
    }

    pub mod object_reference {
        pub const REFERENCE_TYPE: u8 = 1;
        pub const IS_COLLECTED: u8 = 9;
    }

    pub mod string_reference {
        pub const VALUE: u8 = 1;
    }

    pub mod thread_reference {
        pub const NAME: u8 = 1;
        pub const SUSPEND: u8 = 2;
        pub const RESUME: u8 = 3;
        pub const STATUS: u8 = 4;
        pub const SUSPEND_COUNT: u8 = 12;
    }

    pub mod event_request {
        pub const SET: u8 = 1;
        pub const CLEAR: u8 = 2;
        pub const CLEAR_ALL_BREAKPOINTS: u8 = 3;
    }

    pub mod event {
        pub const COMPOSITE: u8 = 100;
    }

    pub mod squawk_vm {
        /// Agent -> proxy: resolve the offsets a single step must stop at.
        pub const STEPPING_INFO: u8 = 1;
        /// Agent -> proxy: snapshot of every thread's state after a suspend or resume.
        pub const THREAD_STATE_CHANGED: u8 = 2;
    }
}

pub mod event_kind {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const FRAME_POP: u8 = 3;
    pub const EXCEPTION: u8 = 4;
    pub const USER_DEFINED: u8 = 5;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const THREAD_END: u8 = THREAD_DEATH;
    pub const CLASS_PREPARE: u8 = 8;
    pub const CLASS_UNLOAD: u8 = 9;
    pub const CLASS_LOAD: u8 = 10;
    pub const FIELD_ACCESS: u8 = 20;
    pub const FIELD_MODIFICATION: u8 = 21;
    pub const EXCEPTION_CATCH: u8 = 30;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

pub mod modifier_kind {
    pub const COUNT: u8 = 1;
    pub const CONDITIONAL: u8 = 2;
    pub const THREAD_ONLY: u8 = 3;
    pub const CLASS_ONLY: u8 = 4;
    pub const CLASS_MATCH: u8 = 5;
    pub const CLASS_EXCLUDE: u8 = 6;
    pub const LOCATION_ONLY: u8 = 7;
    pub const EXCEPTION_ONLY: u8 = 8;
    pub const FIELD_ONLY: u8 = 9;
    pub const STEP: u8 = 10;
    pub const INSTANCE_ONLY: u8 = 11;
}

pub mod suspend_policy {
    pub const NONE: u8 = 0;
    pub const EVENT_THREAD: u8 = 1;
    pub const ALL: u8 = 2;
}

pub mod error_code {
    pub const NONE: u16 = 0;
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const INVALID_LOCATION: u16 = 24;
    pub const NOT_IMPLEMENTED: u16 = 99;
    pub const ABSENT_INFORMATION: u16 = 101;
    pub const INVALID_EVENT_TYPE: u16 = 102;
    pub const VM_DEAD: u16 = 112;
    pub const INTERNAL: u16 = 113;
    pub const INVALID_STRING: u16 = 506;
}

pub mod tag {
    pub const ARRAY: u8 = b'[';
    pub const OBJECT: u8 = b'L';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';
}

pub mod type_tag {
    pub const CLASS: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const ARRAY: u8 = 3;
}

pub mod class_status {
    pub const VERIFIED: i32 = 1;
    pub const PREPARED: i32 = 2;
    pub const INITIALIZED: i32 = 4;
    pub const ERROR: i32 = 8;
}

pub mod thread_status {
    pub const ZOMBIE: i32 = 0;
    pub const RUNNING: i32 = 1;
    pub const SLEEPING: i32 = 2;
    pub const MONITOR: i32 = 3;
    pub const WAIT: i32 = 4;
}

pub mod suspend_status {
    pub const SUSPENDED: i32 = 1;
}

pub mod step_size {
    pub const MIN: i32 = 0;
    pub const LINE: i32 = 1;
}

pub mod step_depth {
    pub const INTO: i32 = 0;
    pub const OVER: i32 = 1;
    pub const OUT: i32 = 2;
}
