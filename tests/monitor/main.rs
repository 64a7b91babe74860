mod api;
mod pool;
mod test_utils;
