mod metadata;
mod sessions;
