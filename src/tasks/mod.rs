pub mod refresh_loop;
