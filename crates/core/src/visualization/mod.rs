pub mod overlay_renderer;
pub mod visualization_layer;
