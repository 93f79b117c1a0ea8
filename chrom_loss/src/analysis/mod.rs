pub mod chromosomal_loss;
pub mod inspection;
pub mod loss_table;
pub mod specificity;
pub mod summary;
