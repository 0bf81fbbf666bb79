mod helpers;
mod messaging;
