pub mod shared {
    pub mod constants;
    pub mod frame_buffer;
    pub mod pixel_format;
}

pub mod recording {
    pub mod domain {
        pub mod clock;
        pub mod frame_queue;
        pub mod frame_sink;
        pub mod pacing;
        pub mod recorder_settings;
        pub mod recorder_state;
    }
    pub mod error;
    pub mod recorder;
    mod session;
    mod writer_loop;

    #[cfg(test)]
    pub(crate) mod test_support;
}

pub mod video {
    pub mod infrastructure;
}
