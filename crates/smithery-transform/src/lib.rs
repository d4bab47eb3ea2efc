pub mod generate_content;
pub mod stream2nostream;
