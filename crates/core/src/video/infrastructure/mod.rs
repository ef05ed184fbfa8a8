pub mod ffmpeg_command;
pub mod ffmpeg_pipe_sink;
