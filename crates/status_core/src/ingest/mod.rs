pub mod status_csv;
