pub mod annotation;
pub mod cnv_matrix;
pub mod labels;
pub mod scperturb;
