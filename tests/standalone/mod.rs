mod recovery;
mod sessions_and_watches;
mod start_stop;
