pub mod mysql;
pub mod sql_generator;

pub use mysql::MysqlBackend;
