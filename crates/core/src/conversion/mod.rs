pub mod frame_format_converter;
