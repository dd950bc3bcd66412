mod fakes;
mod web;
