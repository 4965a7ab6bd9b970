pub mod import_genres;
